//! The planning loop.
//!
//! One orchestrator invocation drives the model through a bounded number
//! of tool rounds and ends in exactly one terminal decision: propose
//! times, book, request clarification, or cancel.  Tool failures are fed
//! back into the transcript as failed tool results so the model can
//! adapt; model transport failures and the round bound abort the
//! invocation with a typed error, recording the reason on the request
//! without changing its status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stina_domain::config::{LlmConfig, OrchestratorConfig, SchedulingConfig};
use stina_domain::error::{Error, Result};
use stina_domain::request::{
    MeetingRequest, ProposedTime, RequestStatus, RequestUpdate, ScheduledEvent,
};
use stina_domain::tool::{Message, ToolCall};
use stina_providers::{CalendarProvider, ChatRequest, EventDraft, LanguageModel};
use stina_store::RequestRepository;

use crate::lifecycle::{self, TransitionFields};
use crate::tools::{effective_preferences, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One candidate window inside a terminal decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// The single decision every invocation must end in, emitted by the
/// model as a JSON object tagged by `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TerminalDecision {
    /// Offer candidate windows and wait for the requester's reply.
    ProposeTimes {
        times: Vec<DecisionSlot>,
        #[serde(default)]
        summary: Option<String>,
    },
    /// Book the chosen slot on the requester's calendar.
    Book {
        slot: DecisionSlot,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        summary: Option<String>,
    },
    /// Ask the requester for missing information.
    RequestClarification { question: String },
    /// Abandon the request.
    Cancel { reason: String },
}

impl TerminalDecision {
    fn label(&self) -> &'static str {
        match self {
            Self::ProposeTimes { .. } => "propose_times",
            Self::Book { .. } => "book",
            Self::RequestClarification { .. } => "request_clarification",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// What one completed invocation produced.
#[derive(Debug)]
pub struct OrchestrationOutcome {
    pub decision: TerminalDecision,
    pub request: MeetingRequest,
    pub rounds_used: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    calendar: Arc<dyn CalendarProvider>,
    repo: Arc<dyn RequestRepository>,
    config: OrchestratorConfig,
    llm: LlmConfig,
    scheduling: SchedulingConfig,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRegistry>,
        calendar: Arc<dyn CalendarProvider>,
        repo: Arc<dyn RequestRepository>,
        config: OrchestratorConfig,
        llm: LlmConfig,
        scheduling: SchedulingConfig,
    ) -> Self {
        Self {
            model,
            tools,
            calendar,
            repo,
            config,
            llm,
            scheduling,
        }
    }

    /// Run one invocation for `request_id`.
    ///
    /// The caller holds the per-request lock; this method assumes
    /// exclusive access for its duration.
    pub async fn run(&self, request_id: &str) -> Result<OrchestrationOutcome> {
        let request = self
            .repo
            .get(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {request_id}")))?;

        match request.status {
            RequestStatus::AnalysingEmail | RequestStatus::ProcessingWithStina => {
                return Err(Error::Orchestration(format!(
                    "request {request_id} has not finished extraction (status {})",
                    request.status
                )));
            }
            s if s.is_terminal() => {
                return Err(Error::Orchestration(format!(
                    "request {request_id} is already {s}"
                )));
            }
            _ => {}
        }

        let consumed = request.unprocessed_ids();
        let mut transcript = vec![
            Message::system(system_prompt()),
            Message::user(planning_context(&request, &self.scheduling)),
        ];

        // Write calls already executed this invocation, keyed by tool
        // name plus canonical arguments, mapped to their result content.
        let mut completed_writes: HashMap<(String, String), String> = HashMap::new();

        let round_timeout = Duration::from_secs(self.llm.round_timeout_secs);
        let mut rounds = 0u32;

        while rounds < self.config.max_tool_rounds {
            rounds += 1;

            let req = ChatRequest {
                messages: transcript.clone(),
                tools: self.tools.definitions(),
                temperature: Some(self.llm.temperature),
                max_tokens: None,
                json_mode: false,
                model: None,
            };
            let response = match tokio::time::timeout(round_timeout, self.model.chat(req)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    self.record_failure(
                        request_id,
                        &format!("model call failed in round {rounds}: {e}"),
                    )
                    .await;
                    return Err(e);
                }
                Err(_) => {
                    let reason = format!(
                        "model round {rounds} exceeded {}s",
                        round_timeout.as_secs()
                    );
                    self.record_failure(request_id, &reason).await;
                    return Err(Error::Timeout(format!(
                        "request {request_id}: {reason}"
                    )));
                }
            };

            if response.tool_calls.is_empty() {
                match parse_decision(&response.content) {
                    Ok(decision) => {
                        tracing::info!(
                            request_id = %request_id,
                            decision = decision.label(),
                            rounds,
                            "terminal decision reached"
                        );
                        let request = self.apply_decision(request_id, &decision, &consumed).await?;
                        return Ok(OrchestrationOutcome {
                            decision,
                            request,
                            rounds_used: rounds,
                        });
                    }
                    Err(reason) => {
                        tracing::warn!(request_id = %request_id, %reason, "undecodable decision, asking again");
                        transcript.push(Message::assistant(response.content));
                        transcript.push(Message::user(format!(
                            "That was not a valid decision: {reason}. Reply with a single \
                             JSON object whose \"action\" is one of propose_times, book, \
                             request_clarification or cancel."
                        )));
                        continue;
                    }
                }
            }

            transcript.push(Message::assistant_with_tool_calls(
                &response.content,
                &response.tool_calls,
            ));
            let results = self
                .run_tool_batch(request_id, &response.tool_calls, &mut completed_writes)
                .await;
            for (call, (content, is_error)) in response.tool_calls.iter().zip(results) {
                transcript.push(Message::tool_result(&call.call_id, content, is_error));
            }
        }

        let reason = format!(
            "planning exhausted after {rounds} tool rounds without a terminal decision"
        );
        self.record_failure(request_id, &reason).await;
        Err(Error::PlanningExhausted { rounds })
    }

    /// Status-preserving write of the failure reason, so a stalled
    /// request stays inspectable.  The original error wins when this
    /// write fails too.
    async fn record_failure(&self, request_id: &str, reason: &str) {
        let update = RequestUpdate {
            last_error: Some(Some(reason.to_owned())),
            ..Default::default()
        };
        if let Err(e) = self.repo.update(request_id, None, update).await {
            tracing::warn!(request_id = %request_id, error = %e, "could not record orchestration failure");
        }
    }

    // ── Tool dispatch ──────────────────────────────────────────────

    /// Execute one round's tool calls concurrently, preserving call order
    /// in the returned results.  A write call whose name and arguments
    /// match an already-successful write this invocation is not
    /// re-executed; its prior result is replayed.
    async fn run_tool_batch(
        &self,
        request_id: &str,
        calls: &[ToolCall],
        completed_writes: &mut HashMap<(String, String), String>,
    ) -> Vec<(String, bool)> {
        enum Plan<'a> {
            Replay(String),
            Run(&'a ToolCall),
        }

        let mut plans = Vec::with_capacity(calls.len());
        let mut seen_this_batch: Vec<(String, String)> = Vec::new();
        for call in calls {
            let key = (call.tool_name.clone(), call.arguments.to_string());
            if ToolRegistry::is_write_tool(&call.tool_name) {
                if let Some(prior) = completed_writes.get(&key) {
                    tracing::debug!(tool = %call.tool_name, "replaying deduplicated write");
                    plans.push(Plan::Replay(prior.clone()));
                    continue;
                }
                if seen_this_batch.contains(&key) {
                    plans.push(Plan::Replay(format!(
                        "duplicate {} call in the same round was skipped",
                        call.tool_name
                    )));
                    continue;
                }
                seen_this_batch.push(key);
            }
            plans.push(Plan::Run(call));
        }

        let futures = plans.iter().map(|plan| async move {
            match plan {
                Plan::Replay(content) => (content.clone(), false),
                Plan::Run(call) => self.dispatch_with_timeout(request_id, *call).await,
            }
        });
        let results: Vec<(String, bool)> = join_all(futures).await;

        for (call, (content, is_error)) in calls.iter().zip(&results) {
            if ToolRegistry::is_write_tool(&call.tool_name) && !is_error {
                let key = (call.tool_name.clone(), call.arguments.to_string());
                completed_writes.entry(key).or_insert_with(|| content.clone());
            }
        }
        results
    }

    async fn dispatch_with_timeout(&self, request_id: &str, call: &ToolCall) -> (String, bool) {
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);
        match tokio::time::timeout(
            timeout,
            self.tools
                .dispatch(request_id, &call.tool_name, &call.arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => (
                format!(
                    "tool '{}' timed out after {}s",
                    call.tool_name,
                    timeout.as_secs()
                ),
                true,
            ),
        }
    }

    // ── Decision application ───────────────────────────────────────

    async fn apply_decision(
        &self,
        request_id: &str,
        decision: &TerminalDecision,
        consumed: &[String],
    ) -> Result<MeetingRequest> {
        match decision {
            TerminalDecision::ProposeTimes { times, summary } => {
                let proposed = self.to_proposed_times(request_id, times).await?;
                if proposed.is_empty() {
                    return Err(Error::validation("times", "propose_times needs at least one slot"));
                }
                self.persist_with_retry(request_id, |current| {
                    let target = match current.status {
                        RequestStatus::ContextCollection => Some(RequestStatus::PendingReply),
                        // Fresh proposals for an already-booked meeting
                        // put it back in flight.
                        RequestStatus::Scheduled => Some(RequestStatus::Rescheduled),
                        _ => None,
                    };
                    let fields = TransitionFields {
                        context_summary: summary.clone(),
                        proposed_times: Some(proposed.clone()),
                        mark_processed: consumed.to_vec(),
                        last_error: Some(None),
                        ..Default::default()
                    };
                    (target, fields)
                })
                .await
            }

            TerminalDecision::Book {
                slot,
                title,
                summary,
            } => self.book(request_id, slot, title.as_deref(), summary, consumed).await,

            TerminalDecision::RequestClarification { question } => {
                self.persist_with_retry(request_id, |current| {
                    let target = (current.status == RequestStatus::ContextCollection)
                        .then_some(RequestStatus::PendingReply);
                    let fields = TransitionFields {
                        context_summary: Some(format!("awaiting reply: {question}")),
                        mark_processed: consumed.to_vec(),
                        last_error: Some(None),
                        ..Default::default()
                    };
                    (target, fields)
                })
                .await
            }

            TerminalDecision::Cancel { reason } => {
                self.persist_with_retry(request_id, |_current| {
                    let fields = TransitionFields {
                        context_summary: Some(format!("cancelled: {reason}")),
                        scheduled_event: Some(None),
                        mark_processed: consumed.to_vec(),
                        last_error: Some(None),
                        ..Default::default()
                    };
                    (Some(RequestStatus::Cancelled), fields)
                })
                .await
            }
        }
    }

    async fn book(
        &self,
        request_id: &str,
        slot: &DecisionSlot,
        title: Option<&str>,
        summary: &Option<String>,
        consumed: &[String],
    ) -> Result<MeetingRequest> {
        if slot.end <= slot.start {
            return Err(Error::validation("slot", "slot end must be after start"));
        }

        let request = self
            .repo
            .get(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {request_id}")))?;
        let prefs = effective_preferences(&request, &self.scheduling);
        let timezone = slot
            .timezone
            .clone()
            .unwrap_or_else(|| prefs.timezone_name.clone());

        let title = title
            .map(str::to_owned)
            .or_else(|| {
                request
                    .extraction_result
                    .as_ref()
                    .and_then(|o| o.intent())
                    .map(|i| i.purpose.clone())
            })
            .unwrap_or_else(|| "Meeting".into());

        // The booking is awaited before any status write, so a persisted
        // `scheduled` always refers to a real calendar event.
        let created = self
            .calendar
            .create_event(EventDraft {
                title,
                description: request.context_summary.clone(),
                start: slot.start,
                end: slot.end,
                timezone: timezone.clone(),
                location: slot.location.clone(),
                attendees: request.participants.iter().map(|p| p.email.clone()).collect(),
            })
            .await?;
        tracing::info!(
            request_id = %request_id,
            event_id = %created.event_id,
            "calendar event created"
        );

        let event = ScheduledEvent {
            event_id: created.event_id.clone(),
            calendar_id: created.calendar_id.clone(),
            start: slot.start,
            end: slot.end,
        };
        let chosen = ProposedTime {
            start: slot.start,
            end: slot.end,
            timezone,
            location: slot.location.clone(),
            note: slot.note.clone(),
        };

        self.persist_with_retry(request_id, |current| {
            // Booking over an existing booking is a reschedule; the new
            // event replaces the old one in the same write.
            let target = if current.status == RequestStatus::Scheduled {
                RequestStatus::Rescheduled
            } else {
                RequestStatus::Scheduled
            };
            let fields = TransitionFields {
                context_summary: summary.clone(),
                proposed_times: Some(vec![chosen.clone()]),
                scheduled_event: Some(Some(event.clone())),
                mark_processed: consumed.to_vec(),
                last_error: Some(None),
                ..Default::default()
            };
            (Some(target), fields)
        })
        .await
        .map_err(|e| {
            Error::Orchestration(format!(
                "event {} was created on calendar {} but persisting the booking failed: {e}",
                created.event_id, created.calendar_id
            ))
        })
    }

    /// Persist a decision, retrying with exponential backoff when a
    /// concurrent writer invalidates the compare-and-set.  Every attempt
    /// re-reads the request and re-plans the write against its fresh
    /// status.
    async fn persist_with_retry(
        &self,
        request_id: &str,
        plan: impl Fn(&MeetingRequest) -> (Option<RequestStatus>, TransitionFields),
    ) -> Result<MeetingRequest> {
        let mut backoff = Duration::from_millis(self.config.persist_backoff_ms);
        let mut attempt = 0u32;
        loop {
            let current = self
                .repo
                .get(request_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("request {request_id}")))?;
            let (target, fields) = plan(&current);

            let result = match target {
                Some(target) => {
                    lifecycle::apply_transition(&self.repo, request_id, target, fields).await
                }
                None => {
                    let update = RequestUpdate {
                        status: None,
                        context_summary: fields.context_summary,
                        proposed_times: fields.proposed_times,
                        scheduled_event: fields.scheduled_event,
                        metadata: fields.metadata,
                        mark_processed: fields.mark_processed,
                        extraction: fields.extraction,
                        last_error: fields.last_error,
                        ..Default::default()
                    };
                    self.repo.update(request_id, Some(current.status), update).await
                }
            };

            match result {
                Err(Error::Conflict { .. }) if attempt < self.config.persist_retries => {
                    attempt += 1;
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        "concurrent update during decision persist, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }

    async fn to_proposed_times(
        &self,
        request_id: &str,
        times: &[DecisionSlot],
    ) -> Result<Vec<ProposedTime>> {
        let request = self
            .repo
            .get(request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {request_id}")))?;
        let prefs = effective_preferences(&request, &self.scheduling);

        let mut proposed = Vec::with_capacity(times.len());
        for slot in times {
            if slot.end <= slot.start {
                return Err(Error::validation("times", "slot end must be after start"));
            }
            proposed.push(ProposedTime {
                start: slot.start,
                end: slot.end,
                timezone: slot
                    .timezone
                    .clone()
                    .unwrap_or_else(|| prefs.timezone_name.clone()),
                location: slot.location.clone(),
                note: slot.note.clone(),
            });
        }
        Ok(proposed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn system_prompt() -> String {
    r#"You are Stina, a scheduling assistant. You are handling one meeting
request. Use the available tools to check availability, look up contacts,
find venues and message participants. When you have enough information,
stop calling tools and reply with exactly one JSON object describing your
decision:

{"action": "propose_times", "times": [{"start": "...", "end": "...", "timezone": "...", "location": null, "note": null}], "summary": "..."}
{"action": "book", "slot": {"start": "...", "end": "...", "timezone": "..."}, "title": "...", "summary": "..."}
{"action": "request_clarification", "question": "..."}
{"action": "cancel", "reason": "..."}

Timestamps are RFC 3339 in UTC. Book only a slot confirmed free via
check_schedule. Prefer the earliest suitable slot. If no slot in the
requested timeframe is free, propose alternatives or ask for
clarification instead of booking."#
        .to_string()
}

/// The structured snapshot of the request handed to the model as the
/// first user message.
fn planning_context(request: &MeetingRequest, scheduling: &SchedulingConfig) -> String {
    let prefs = effective_preferences(request, scheduling);
    let communications: Vec<Value> = request
        .communications
        .iter()
        .map(|c| {
            serde_json::json!({
                "sender": c.sender,
                "channel": c.channel,
                "received_at": c.timestamp,
                "processed": c.processed,
                "content": c.content,
            })
        })
        .collect();

    let context = serde_json::json!({
        "request_id": request.id,
        "status": request.status,
        "requester": request.creator.email,
        "intent": request.extraction_result.as_ref().and_then(|o| o.intent()),
        "context_summary": request.context_summary,
        "participants": request.participants,
        "proposed_times": request.proposed_times,
        "scheduled_event": request.scheduled_event,
        "communications": communications,
        "preferences": {
            "working_hours": format!("{:02}:00-{:02}:00", prefs.working_hours_start, prefs.working_hours_end),
            "timezone": prefs.timezone_name,
            "buffer_minutes": prefs.buffer_minutes,
            "default_duration_minutes": prefs.default_duration_minutes,
        },
        "now": Utc::now(),
    });
    format!("Current meeting request:\n{context}")
}

/// Pull the decision object out of the model's final text, tolerating
/// fences and prose around the JSON.
fn parse_decision(content: &str) -> std::result::Result<TerminalDecision, String> {
    let trimmed = content.trim();
    let start = trimmed.find('{').ok_or("no JSON object in response")?;
    let end = trimmed.rfind('}').ok_or("no JSON object in response")?;
    if end < start {
        return Err("no JSON object in response".into());
    }
    serde_json::from_str(&trimmed[start..=end]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_from_fenced_output() {
        let content = "Here is my decision:\n```json\n{\"action\": \"cancel\", \"reason\": \"requester withdrew\"}\n```";
        let decision = parse_decision(content).unwrap();
        assert!(matches!(decision, TerminalDecision::Cancel { .. }));
    }

    #[test]
    fn decision_with_unknown_action_is_rejected() {
        let err = parse_decision("{\"action\": \"shrug\"}").unwrap_err();
        assert!(err.contains("shrug") || err.contains("unknown"));
    }

    #[test]
    fn prose_without_json_is_rejected() {
        assert!(parse_decision("I think we should meet on Tuesday.").is_err());
    }

    #[test]
    fn book_decision_roundtrips() {
        let json = serde_json::json!({
            "action": "book",
            "slot": {
                "start": "2026-09-01T09:00:00Z",
                "end": "2026-09-01T09:30:00Z",
                "timezone": "UTC"
            },
            "title": "Budget sync"
        });
        let decision: TerminalDecision = serde_json::from_value(json).unwrap();
        match decision {
            TerminalDecision::Book { slot, title, .. } => {
                assert_eq!(title.as_deref(), Some("Budget sync"));
                assert!(slot.end > slot.start);
            }
            other => panic!("expected book, got {other:?}"),
        }
    }

    #[test]
    fn propose_times_defaults_optional_fields() {
        let json = serde_json::json!({
            "action": "propose_times",
            "times": [{
                "start": "2026-09-01T09:00:00Z",
                "end": "2026-09-01T09:30:00Z"
            }]
        });
        let decision: TerminalDecision = serde_json::from_value(json).unwrap();
        match decision {
            TerminalDecision::ProposeTimes { times, summary } => {
                assert_eq!(times.len(), 1);
                assert!(times[0].timezone.is_none());
                assert!(summary.is_none());
            }
            other => panic!("expected propose_times, got {other:?}"),
        }
    }
}
