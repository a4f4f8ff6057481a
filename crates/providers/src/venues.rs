//! Venue/places collaborator contract.

use serde::{Deserialize, Serialize};

use stina_domain::error::Result;

/// Search parameters for a venue lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueQuery {
    /// Free-text location anchor, e.g. "Södermalm, Stockholm".
    pub location: String,
    /// Tags to filter by, e.g. "cafe", "quiet".
    #[serde(default)]
    pub tags: Vec<String>,
    /// Search radius in meters.
    pub radius_m: u32,
    pub limit: u32,
}

/// One ranked venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[async_trait::async_trait]
pub trait VenueProvider: Send + Sync {
    /// Ranked venues matching the query, best first.
    async fn search(&self, query: VenueQuery) -> Result<Vec<Venue>>;
}
