//! Structured meeting intent — the output contract of the extraction stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The initiator of a meeting request as understood from a communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPerson {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One invited attendee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentInvitee {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Relationship or work context, e.g. "client", "direct report".
    #[serde(default)]
    pub relationship: Option<String>,
}

/// Structured intent extracted from one communication.
///
/// Schema validation is all-or-nothing: either the whole record
/// deserializes, or the extraction attempt is a typed failure.  The
/// requested timeframe is captured verbatim — no date arithmetic is
/// performed at this stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingIntent {
    pub initiator: IntentPerson,
    #[serde(default)]
    pub invitees: Vec<IntentInvitee>,
    pub purpose: String,
    /// Requested timeframe, verbatim (e.g. "Tuesday 2pm", "next week").
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub location_hint: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MeetingIntent {
    /// JSON schema handed to the language model for structured output.
    /// Kept in lockstep with the serde shape above.
    pub fn json_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "initiator": {
                    "type": "object",
                    "properties": {
                        "email": { "type": "string" },
                        "name": { "type": ["string", "null"] }
                    },
                    "required": ["email"]
                },
                "invitees": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "email": { "type": "string" },
                            "name": { "type": ["string", "null"] },
                            "relationship": { "type": ["string", "null"] }
                        },
                        "required": ["email"]
                    }
                },
                "purpose": { "type": "string" },
                "timeframe": { "type": ["string", "null"] },
                "duration_minutes": { "type": ["integer", "null"], "minimum": 1 },
                "location_hint": { "type": ["string", "null"] },
                "notes": { "type": ["string", "null"] }
            },
            "required": ["initiator", "purpose"]
        })
    }
}

/// Result of the most recent extraction attempt, stored on the request.
///
/// A successful outcome is immutable; a failed one may be overwritten by
/// a fresh attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Success {
        intent: MeetingIntent,
        extracted_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        attempted_at: DateTime<Utc>,
    },
}

impl ExtractionOutcome {
    pub fn success(intent: MeetingIntent) -> Self {
        Self::Success {
            intent,
            extracted_at: Utc::now(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            attempted_at: Utc::now(),
        }
    }

    pub fn intent(&self) -> Option<&MeetingIntent> {
        match self {
            Self::Success { intent, .. } => Some(intent),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_deserializes_with_optional_fields_absent() {
        let json = serde_json::json!({
            "initiator": { "email": "anna@example.com" },
            "purpose": "quarterly sync"
        });
        let intent: MeetingIntent = serde_json::from_value(json).unwrap();
        assert_eq!(intent.initiator.email, "anna@example.com");
        assert!(intent.invitees.is_empty());
        assert!(intent.timeframe.is_none());
    }

    #[test]
    fn intent_rejects_missing_purpose() {
        let json = serde_json::json!({
            "initiator": { "email": "anna@example.com" }
        });
        assert!(serde_json::from_value::<MeetingIntent>(json).is_err());
    }

    #[test]
    fn schema_names_required_fields() {
        let schema = MeetingIntent::json_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["initiator", "purpose"]);
    }

    #[test]
    fn failed_outcome_records_reason() {
        let outcome = ExtractionOutcome::failed("model returned invalid JSON");
        assert!(!outcome.is_success());
        assert!(outcome.intent().is_none());
    }
}
