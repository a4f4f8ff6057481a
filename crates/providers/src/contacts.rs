//! Contacts collaborator contract.

use serde::{Deserialize, Serialize};

use stina_domain::error::Result;
use stina_domain::request::SchedulingPreferences;

/// An enriched contact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub preferences: Option<SchedulingPreferences>,
}

#[async_trait::async_trait]
pub trait ContactsProvider: Send + Sync {
    /// Look up a contact by email or display name.
    ///
    /// With `strict` set, only exact-identifier matches are returned;
    /// otherwise the provider may fall back to fuzzy matching.  `Ok(None)`
    /// means not found — the caller decides whether that is an error.
    async fn lookup(&self, identifier: &str, strict: bool) -> Result<Option<ContactRecord>>;
}
