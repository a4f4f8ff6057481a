//! The meeting request aggregate.
//!
//! A [`MeetingRequest`] tracks one scheduling conversation end-to-end:
//! who is involved, what was said, which times were proposed, and where
//! in the lifecycle the conversation currently sits.  The aggregate is
//! mutated exclusively through [`RequestUpdate`] patches applied by the
//! repository, so the invariants checked in [`MeetingRequest::apply_update`]
//! hold for every persisted document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::intent::ExtractionOutcome;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle status of a meeting request.
///
/// `AnalysingEmail` and `ProcessingWithStina` form an optional pre-stage
/// pair for email-originated requests; they exist to expose extraction
/// progress to observers and collapse into `ContextCollection` once
/// extraction succeeds.  Requests created directly through the API start
/// at `ContextCollection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    AnalysingEmail,
    ProcessingWithStina,
    ContextCollection,
    PendingReply,
    Scheduled,
    Rescheduled,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// All status values, in declaration order.
    pub const ALL: [RequestStatus; 8] = [
        Self::AnalysingEmail,
        Self::ProcessingWithStina,
        Self::ContextCollection,
        Self::PendingReply,
        Self::Scheduled,
        Self::Rescheduled,
        Self::Completed,
        Self::Cancelled,
    ];

    /// The directed transition table.  A transition is valid iff the
    /// target appears in the slice returned for the current status.
    pub fn allowed_targets(self) -> &'static [RequestStatus] {
        match self {
            Self::AnalysingEmail => &[Self::ProcessingWithStina, Self::Cancelled],
            Self::ProcessingWithStina => &[Self::ContextCollection, Self::Cancelled],
            Self::ContextCollection => &[Self::Scheduled, Self::PendingReply, Self::Cancelled],
            Self::PendingReply => &[Self::ContextCollection, Self::Scheduled, Self::Cancelled],
            Self::Scheduled => &[Self::Rescheduled, Self::Completed, Self::Cancelled],
            Self::Rescheduled => &[Self::Scheduled, Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: RequestStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// States in which a `scheduled_event` may be present.
    pub fn allows_booking(self) -> bool {
        matches!(self, Self::Scheduled | Self::Rescheduled | Self::Completed)
    }

    /// Information-gathering states, where `proposed_times` may be empty.
    pub fn is_information_gathering(self) -> bool {
        matches!(
            self,
            Self::AnalysingEmail
                | Self::ProcessingWithStina
                | Self::ContextCollection
                | Self::PendingReply
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnalysingEmail => "analysing_email",
            Self::ProcessingWithStina => "processing_with_stina",
            Self::ContextCollection => "context_collection",
            Self::PendingReply => "pending_reply",
            Self::Scheduled => "scheduled",
            Self::Rescheduled => "rescheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::validation("status", format!("unknown status '{s}'")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Value types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Channel a communication arrived through (or a request originated from).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationChannel {
    Email,
    Text,
    Chat,
    Api,
}

impl std::fmt::Display for CommunicationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Text => "text",
            Self::Chat => "chat",
            Self::Api => "api",
        };
        f.write_str(s)
    }
}

/// Structured scheduling preferences attached to a participant.
///
/// Replaces the free-form preference blobs of earlier designs with named
/// fields plus one bounded free-text field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingPreferences {
    #[serde(default)]
    pub working_hours_start: Option<u8>,
    #[serde(default)]
    pub working_hours_end: Option<u8>,
    #[serde(default)]
    pub buffer_minutes: Option<u32>,
    #[serde(default)]
    pub default_duration_minutes: Option<u32>,
    /// IANA timezone name, e.g. `"Europe/Stockholm"`.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Free-text notes, truncated to [`Self::MAX_NOTES_LEN`] on merge.
    #[serde(default)]
    pub notes: Option<String>,
}

impl SchedulingPreferences {
    pub const MAX_NOTES_LEN: usize = 1_000;

    /// Overlay `other` on top of `self`: set fields win, notes are bounded.
    pub fn merge(&mut self, other: &SchedulingPreferences) {
        if other.working_hours_start.is_some() {
            self.working_hours_start = other.working_hours_start;
        }
        if other.working_hours_end.is_some() {
            self.working_hours_end = other.working_hours_end;
        }
        if other.buffer_minutes.is_some() {
            self.buffer_minutes = other.buffer_minutes;
        }
        if other.default_duration_minutes.is_some() {
            self.default_duration_minutes = other.default_duration_minutes;
        }
        if other.timezone.is_some() {
            self.timezone = other.timezone.clone();
        }
        if let Some(notes) = &other.notes {
            let mut bounded = notes.clone();
            if bounded.len() > Self::MAX_NOTES_LEN {
                let mut cut = Self::MAX_NOTES_LEN;
                while cut > 0 && !bounded.is_char_boundary(cut) {
                    cut -= 1;
                }
                bounded.truncate(cut);
            }
            self.notes = Some(bounded);
        }
    }
}

/// One person attached to a meeting request, keyed by email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Whether this participant is a registered user of the product.
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub preferences: Option<SchedulingPreferences>,
}

impl Participant {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            registered: false,
            preferences: None,
        }
    }

    /// Merge `other` into `self` (same email).  Name and preferences are
    /// filled in or overlaid; the registration flag is sticky once set.
    fn merge(&mut self, other: &Participant) {
        if other.name.is_some() {
            self.name = other.name.clone();
        }
        self.registered |= other.registered;
        match (&mut self.preferences, &other.preferences) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => {
                let mut prefs = SchedulingPreferences::default();
                prefs.merge(theirs);
                self.preferences = Some(prefs);
            }
            _ => {}
        }
    }
}

/// Who created the request and through which channel.  Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub email: String,
    pub channel: CommunicationChannel,
}

/// One inbound or outbound message attached to a request.  Append-only;
/// `processed` flips false→true exactly once when the extraction stage
/// consumes the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Communication {
    pub id: String,
    pub channel: CommunicationChannel,
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
}

impl Communication {
    pub fn new(
        channel: CommunicationChannel,
        content: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel,
            content: content.into(),
            sender: sender.into(),
            timestamp: Utc::now(),
            processed: false,
        }
    }
}

/// One candidate time window offered to the participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTime {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// IANA timezone the window was expressed in.
    pub timezone: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// The booked calendar event.  Present only once the request reaches a
/// booked state; a reschedule clears and later resets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub event_id: String,
    pub calendar_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Low,
    Normal,
    High,
    Urgent,
}

/// Loose facts about the meeting itself.  Merged field-by-field on
/// update, never replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub agenda: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub urgency: Option<UrgencyTier>,
}

impl RequestMetadata {
    pub fn merge(&mut self, other: &RequestMetadata) {
        if other.location.is_some() {
            self.location = other.location.clone();
        }
        if other.agenda.is_some() {
            self.agenda = other.agenda.clone();
        }
        if other.duration_minutes.is_some() {
            self.duration_minutes = other.duration_minutes;
        }
        if other.urgency.is_some() {
            self.urgency = other.urgency;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregate root
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The aggregate tracking one scheduling conversation end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub id: String,
    pub status: RequestStatus,
    pub participants: Vec<Participant>,
    pub creator: Creator,
    /// Rolling free-text description of what the meeting is about.
    /// Replaced wholesale on each update.
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub proposed_times: Vec<ProposedTime>,
    #[serde(default)]
    pub scheduled_event: Option<ScheduledEvent>,
    #[serde(default)]
    pub communications: Vec<Communication>,
    #[serde(default)]
    pub metadata: RequestMetadata,
    #[serde(default)]
    pub extraction_result: Option<ExtractionOutcome>,
    /// Reason the most recent orchestration attempt stalled or failed.
    /// Cleared by the next successfully persisted terminal decision.
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeetingRequest {
    /// Create a new request.  Requests always carry at least one
    /// participant; the creator is added when `participants` is empty.
    pub fn new(creator: Creator, initial_status: RequestStatus) -> Self {
        let now = Utc::now();
        let participants = vec![Participant::new(creator.email.clone())];
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: initial_status,
            participants,
            creator,
            context_summary: None,
            proposed_times: Vec::new(),
            scheduled_event: None,
            communications: Vec::new(),
            metadata: RequestMetadata::default(),
            extraction_result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add or merge a participant keyed by email.  An email already
    /// present is updated in place, never duplicated.
    pub fn upsert_participant(&mut self, participant: Participant) {
        match self
            .participants
            .iter_mut()
            .find(|p| p.email.eq_ignore_ascii_case(&participant.email))
        {
            Some(existing) => existing.merge(&participant),
            None => self.participants.push(participant),
        }
    }

    pub fn participant(&self, email: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email))
    }

    /// Oldest communication not yet consumed by the extraction stage.
    pub fn oldest_unprocessed(&self) -> Option<&Communication> {
        self.communications.iter().find(|c| !c.processed)
    }

    /// IDs of all unprocessed communications, in append order.
    pub fn unprocessed_ids(&self) -> Vec<String> {
        self.communications
            .iter()
            .filter(|c| !c.processed)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Apply a validated patch in place.
    ///
    /// Enforces the aggregate invariants: status moves only along the
    /// transition table, `scheduled_event` is only present in booked
    /// states, processed flags are monotonic, and communications are
    /// append-only.  Does not touch `updated_at` — the repository owns
    /// the monotonic timestamp.
    pub fn apply_update(&mut self, update: RequestUpdate) -> Result<()> {
        // Resolve the status the document will end up in, validating the
        // edge first so a rejected transition mutates nothing.
        let next_status = match update.status {
            Some(target) => {
                if !self.status.can_transition_to(target) {
                    return Err(Error::InvalidTransition {
                        from: self.status,
                        to: target,
                    });
                }
                target
            }
            None => self.status,
        };

        // Guard the booking invariant against the post-update status.
        if let Some(Some(event)) = &update.scheduled_event {
            if !next_status.allows_booking() {
                return Err(Error::validation(
                    "scheduled_event",
                    format!(
                        "cannot set scheduled event {} while status is {next_status}",
                        event.event_id
                    ),
                ));
            }
        }
        if update.scheduled_event.is_none()
            && self.scheduled_event.is_some()
            && !next_status.allows_booking()
        {
            return Err(Error::validation(
                "scheduled_event",
                format!("transition to {next_status} must clear the scheduled event"),
            ));
        }

        // Booked states must carry at least one candidate window.
        if matches!(
            next_status,
            RequestStatus::Scheduled | RequestStatus::Rescheduled
        ) {
            let resulting_empty = update
                .proposed_times
                .as_ref()
                .map(|t| t.is_empty())
                .unwrap_or_else(|| self.proposed_times.is_empty());
            if resulting_empty {
                return Err(Error::validation(
                    "proposed_times",
                    format!("status {next_status} requires at least one proposed time"),
                ));
            }
        }

        self.status = next_status;

        if let Some(summary) = update.context_summary {
            self.context_summary = Some(summary);
        }
        if let Some(times) = update.proposed_times {
            self.proposed_times = times;
        }
        if let Some(event) = update.scheduled_event {
            self.scheduled_event = event;
        }
        if let Some(metadata) = &update.metadata {
            self.metadata.merge(metadata);
        }
        for participant in update.participants {
            self.upsert_participant(participant);
        }
        for communication in update.communications {
            self.communications.push(communication);
        }
        for id in &update.mark_processed {
            if let Some(comm) = self.communications.iter_mut().find(|c| &c.id == id) {
                comm.processed = true;
            }
        }
        if let Some(outcome) = update.extraction {
            // A failed attempt never erases previously extracted intent.
            let keep_existing = matches!(
                (&self.extraction_result, &outcome),
                (
                    Some(ExtractionOutcome::Success { .. }),
                    ExtractionOutcome::Failed { .. }
                )
            );
            if !keep_existing {
                self.extraction_result = Some(outcome);
            }
        }
        if let Some(reason) = update.last_error {
            self.last_error = reason;
        }

        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An explicit partial update applied atomically by the repository.
///
/// `scheduled_event` distinguishes "leave unchanged" (`None`) from
/// "clear" (`Some(None)`) from "set" (`Some(Some(event))`).
#[derive(Debug, Clone, Default)]
pub struct RequestUpdate {
    pub status: Option<RequestStatus>,
    pub context_summary: Option<String>,
    pub proposed_times: Option<Vec<ProposedTime>>,
    pub scheduled_event: Option<Option<ScheduledEvent>>,
    pub metadata: Option<RequestMetadata>,
    /// Participants to upsert (merged by email).
    pub participants: Vec<Participant>,
    /// Communications to append.
    pub communications: Vec<Communication>,
    /// Communication IDs whose processed flag flips to true.
    pub mark_processed: Vec<String>,
    pub extraction: Option<ExtractionOutcome>,
    /// `None` = unchanged, `Some(None)` = clear, `Some(Some(_))` = set.
    pub last_error: Option<Option<String>>,
}

impl RequestUpdate {
    pub fn status(target: RequestStatus) -> Self {
        Self {
            status: Some(target),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.context_summary.is_none()
            && self.proposed_times.is_none()
            && self.scheduled_event.is_none()
            && self.metadata.is_none()
            && self.participants.is_empty()
            && self.communications.is_empty()
            && self.mark_processed.is_empty()
            && self.extraction.is_none()
            && self.last_error.is_none()
    }
}
