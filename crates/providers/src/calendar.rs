//! Calendar collaborator contract.
//!
//! Only the requesting user's calendar is consulted; credential handling
//! and refresh live entirely behind the implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stina_domain::error::Result;

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A busy interval reported by the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An event to create on the requester's calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// IANA timezone the event is displayed in.
    pub timezone: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// Identifier pair returned by the provider for a created event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub event_id: String,
    pub calendar_id: String,
}

#[async_trait::async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Busy intervals overlapping the window, in ascending start order.
    async fn list_free_busy(&self, window: TimeWindow) -> Result<Vec<BusyInterval>>;

    /// Create an event and return its external identifiers.
    async fn create_event(&self, draft: EventDraft) -> Result<CreatedEvent>;
}
