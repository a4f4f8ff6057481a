//! Tool registry — the fixed catalogue of schema-validated operations
//! the orchestrator may invoke, and their dispatch to the external
//! collaborators.
//!
//! Dispatch routes on the tool name to a typed handler; each handler
//! deserializes its input struct, validates semantic constraints, and
//! returns the JSON payload fed back to the model.  Failures come back
//! as `(message, is_error = true)` so the planning loop can adapt
//! instead of aborting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use stina_domain::config::SchedulingConfig;
use stina_domain::error::{Error, Result};
use stina_domain::request::{MeetingRequest, RequestStatus};
use stina_domain::tool::ToolDefinition;
use stina_providers::{
    CalendarProvider, ContactsProvider, MessagingProvider, OutboundMessage, TimeWindow,
    VenueProvider, VenueQuery,
};
use stina_store::RequestRepository;

use crate::lifecycle::{self, TransitionFields};
use crate::slots::{self, WorkingHours};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Effective preferences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Requester preferences with config defaults filled in.
#[derive(Debug, Clone)]
pub struct EffectivePreferences {
    pub working_hours_start: u8,
    pub working_hours_end: u8,
    pub timezone: chrono_tz::Tz,
    pub timezone_name: String,
    pub buffer_minutes: u32,
    pub default_duration_minutes: u32,
}

/// Resolve the creator's stored preferences against the configured
/// scheduling defaults.  An unparseable timezone falls back to the
/// configured one (and that to UTC) with a warning.
pub fn effective_preferences(
    request: &MeetingRequest,
    config: &SchedulingConfig,
) -> EffectivePreferences {
    let prefs = request
        .participant(&request.creator.email)
        .and_then(|p| p.preferences.clone())
        .unwrap_or_default();

    let timezone_name = prefs
        .timezone
        .clone()
        .unwrap_or_else(|| config.timezone.clone());
    let timezone: chrono_tz::Tz = timezone_name.parse().unwrap_or_else(|_| {
        tracing::warn!(timezone = %timezone_name, "unknown timezone, falling back to UTC");
        chrono_tz::UTC
    });

    EffectivePreferences {
        working_hours_start: prefs.working_hours_start.unwrap_or(config.working_hours_start),
        working_hours_end: prefs.working_hours_end.unwrap_or(config.working_hours_end),
        timezone,
        timezone_name,
        buffer_minutes: prefs.buffer_minutes.unwrap_or(config.buffer_minutes),
        default_duration_minutes: prefs
            .default_duration_minutes
            .unwrap_or(config.default_duration_minutes),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed tool set, resolved once at construction — no runtime
/// re-registration.
pub struct ToolRegistry {
    calendar: Arc<dyn CalendarProvider>,
    venues: Arc<dyn VenueProvider>,
    messaging: Arc<dyn MessagingProvider>,
    contacts: Arc<dyn ContactsProvider>,
    repo: Arc<dyn RequestRepository>,
    scheduling: SchedulingConfig,
}

/// Maximum number of slots returned by one `check_schedule` call.
const MAX_RETURNED_SLOTS: usize = 5;

impl ToolRegistry {
    pub fn new(
        calendar: Arc<dyn CalendarProvider>,
        venues: Arc<dyn VenueProvider>,
        messaging: Arc<dyn MessagingProvider>,
        contacts: Arc<dyn ContactsProvider>,
        repo: Arc<dyn RequestRepository>,
        scheduling: SchedulingConfig,
    ) -> Self {
        Self {
            calendar,
            venues,
            messaging,
            contacts,
            repo,
            scheduling,
        }
    }

    /// Whether a tool has side effects.  The registry does not
    /// deduplicate write calls; the orchestrator uses this to avoid
    /// re-issuing an already-successful write within one invocation.
    pub fn is_write_tool(name: &str) -> bool {
        matches!(name, "send_message" | "update_request_status")
    }

    /// The tool catalogue exposed to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "check_schedule".into(),
                description: "Check the requester's calendar availability. Returns free slots \
                              (earliest first, inside working hours, buffer applied) and the \
                              busy periods in the window."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "window_start": { "type": "string", "description": "Window start, RFC 3339 (e.g. 2026-09-01T00:00:00Z)" },
                        "window_end": { "type": "string", "description": "Window end, RFC 3339" },
                        "duration_minutes": { "type": "integer", "description": "Desired meeting length in minutes" }
                    },
                    "required": ["window_start", "window_end", "duration_minutes"]
                }),
            },
            ToolDefinition {
                name: "find_venues".into(),
                description: "Search for meeting venues near a location. Returns a ranked list."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "location": { "type": "string", "description": "Location anchor, e.g. a neighbourhood or address" },
                        "tags": { "type": "array", "items": { "type": "string" }, "description": "Filter tags, e.g. 'cafe', 'quiet'" },
                        "radius_m": { "type": "integer", "description": "Search radius in meters (default 1000)" },
                        "limit": { "type": "integer", "description": "Max results (default 5)" }
                    },
                    "required": ["location"]
                }),
            },
            ToolDefinition {
                name: "send_message".into(),
                description: "Send an email/message to participants. Returns a delivery receipt."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "recipients": { "type": "array", "items": { "type": "string" }, "description": "Recipient email addresses" },
                        "subject": { "type": "string", "description": "Message subject" },
                        "body": { "type": "string", "description": "Message body" },
                        "thread_id": { "type": "string", "description": "Existing thread to reply within" }
                    },
                    "required": ["recipients", "subject", "body"]
                }),
            },
            ToolDefinition {
                name: "update_request_status".into(),
                description: "Advance the meeting request's lifecycle status. Only transitions \
                              allowed by the lifecycle table succeed."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "status": { "type": "string", "enum": ["context_collection", "pending_reply", "scheduled", "rescheduled", "completed", "cancelled"], "description": "Target status" },
                        "progress": { "type": "string", "description": "One-line progress summary stored on the request" },
                        "note": { "type": "string", "description": "Optional additional note" }
                    },
                    "required": ["status"]
                }),
            },
            ToolDefinition {
                name: "get_contact".into(),
                description: "Look up an enriched contact record by email or name.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "identifier": { "type": "string", "description": "Email address or display name" },
                        "strict": { "type": "boolean", "description": "Exact matches only (default false)" }
                    },
                    "required": ["identifier"]
                }),
            },
        ]
    }

    /// Execute one tool call on behalf of `request_id`.
    ///
    /// Returns the content string handed back to the model and whether
    /// it represents an error.  Every failure is classified — nothing
    /// panics across this boundary.
    pub async fn dispatch(&self, request_id: &str, name: &str, arguments: &Value) -> (String, bool) {
        let result = match name {
            "check_schedule" => self.check_schedule(request_id, arguments).await,
            "find_venues" => self.find_venues(arguments).await,
            "send_message" => self.send_message(arguments).await,
            "update_request_status" => self.update_request_status(request_id, arguments).await,
            "get_contact" => self.get_contact(arguments).await,
            other => Err(Error::tool(other, "unknown tool")),
        };

        match result {
            Ok(payload) => (payload.to_string(), false),
            Err(e) => {
                tracing::warn!(request_id = %request_id, tool = %name, error = %e, "tool call failed");
                (e.to_string(), true)
            }
        }
    }

    // ── check_schedule ─────────────────────────────────────────────

    async fn check_schedule(&self, request_id: &str, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            window_start: DateTime<Utc>,
            window_end: DateTime<Utc>,
            duration_minutes: i64,
        }
        let input: Input = parse_args("check_schedule", arguments)?;

        if input.duration_minutes <= 0 {
            return Err(Error::validation("duration_minutes", "must be positive"));
        }
        if input.duration_minutes > 24 * 60 {
            return Err(Error::validation("duration_minutes", "longer than a day"));
        }
        if input.window_end <= input.window_start {
            return Err(Error::validation("window_end", "must be after window_start"));
        }

        let request = self
            .repo
            .get(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {request_id}")))?;
        let prefs = effective_preferences(&request, &self.scheduling);

        let window = TimeWindow {
            start: input.window_start,
            end: input.window_end,
        };
        let busy = self.calendar.list_free_busy(window).await?;
        let hours = WorkingHours {
            start_hour: prefs.working_hours_start,
            end_hour: prefs.working_hours_end,
            timezone: prefs.timezone,
        };
        let slots = slots::free_slots(
            window,
            input.duration_minutes as u32,
            &busy,
            &hours,
            prefs.buffer_minutes,
            MAX_RETURNED_SLOTS,
        );

        Ok(serde_json::json!({
            "timezone": prefs.timezone_name,
            "slots": slots,
            "busy": busy,
        }))
    }

    // ── find_venues ────────────────────────────────────────────────

    async fn find_venues(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            location: String,
            #[serde(default)]
            tags: Vec<String>,
            #[serde(default = "d_radius")]
            radius_m: u32,
            #[serde(default = "d_limit")]
            limit: u32,
        }
        fn d_radius() -> u32 {
            1_000
        }
        fn d_limit() -> u32 {
            5
        }
        let input: Input = parse_args("find_venues", arguments)?;

        if input.location.trim().is_empty() {
            return Err(Error::validation("location", "must not be empty"));
        }
        if input.limit == 0 || input.limit > 20 {
            return Err(Error::validation("limit", "must be between 1 and 20"));
        }
        if input.radius_m == 0 || input.radius_m > 50_000 {
            return Err(Error::validation("radius_m", "must be between 1 and 50000"));
        }

        let venues = self
            .venues
            .search(VenueQuery {
                location: input.location,
                tags: input.tags,
                radius_m: input.radius_m,
                limit: input.limit,
            })
            .await?;
        Ok(serde_json::json!({ "venues": venues }))
    }

    // ── send_message ───────────────────────────────────────────────

    async fn send_message(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            recipients: Vec<String>,
            subject: String,
            body: String,
            #[serde(default)]
            thread_id: Option<String>,
        }
        let input: Input = parse_args("send_message", arguments)?;

        if input.recipients.is_empty() {
            return Err(Error::validation("recipients", "must not be empty"));
        }
        if let Some(bad) = input.recipients.iter().find(|r| !r.contains('@')) {
            return Err(Error::validation(
                "recipients",
                format!("'{bad}' is not an email address"),
            ));
        }
        if input.body.trim().is_empty() {
            return Err(Error::validation("body", "must not be empty"));
        }

        let receipt = self
            .messaging
            .send(OutboundMessage {
                recipients: input.recipients,
                subject: input.subject,
                body: input.body,
                thread_id: input.thread_id,
            })
            .await?;
        Ok(serde_json::to_value(receipt)?)
    }

    // ── update_request_status ──────────────────────────────────────

    async fn update_request_status(&self, request_id: &str, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            status: RequestStatus,
            #[serde(default)]
            progress: Option<String>,
            #[serde(default)]
            note: Option<String>,
        }
        let input: Input = parse_args("update_request_status", arguments)?;

        let summary = match (input.progress, input.note) {
            (Some(p), Some(n)) => Some(format!("{p} — {n}")),
            (Some(p), None) => Some(p),
            (None, Some(n)) => Some(n),
            (None, None) => None,
        };

        let fields = TransitionFields {
            context_summary: summary,
            ..Default::default()
        };
        let updated = lifecycle::apply_transition(&self.repo, request_id, input.status, fields)
            .await
            .map_err(|e| match e {
                // Keep transition failures typed so the model sees why.
                e @ Error::InvalidTransition { .. } => e,
                other => Error::tool("update_request_status", other.to_string()),
            })?;

        Ok(serde_json::json!({ "applied_status": updated.status }))
    }

    // ── get_contact ────────────────────────────────────────────────

    async fn get_contact(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            identifier: String,
            #[serde(default)]
            strict: bool,
        }
        let input: Input = parse_args("get_contact", arguments)?;

        if input.identifier.trim().is_empty() {
            return Err(Error::validation("identifier", "must not be empty"));
        }

        match self.contacts.lookup(&input.identifier, input.strict).await? {
            Some(contact) => Ok(serde_json::json!({ "found": true, "contact": contact })),
            None => Ok(serde_json::json!({ "found": false })),
        }
    }
}

/// Deserialize tool arguments, mapping serde failures to a
/// `ValidationError` naming the tool's input.
fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| Error::validation(format!("{tool}.arguments"), e.to_string()))
}
