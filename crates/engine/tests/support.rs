//! Shared test doubles for the engine integration tests.
//!
//! All collaborators are scripted or recording mocks — no network, no
//! clock dependence beyond `Utc::now()` in the code under test.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use stina_domain::config::Config;
use stina_domain::error::{Error, Result};
use stina_domain::tool::ToolCall;
use stina_engine::Scheduler;
use stina_providers::{
    BusyInterval, CalendarProvider, ChatRequest, ChatResponse, ContactRecord, ContactsProvider,
    CreatedEvent, DeliveryReceipt, EventDraft, LanguageModel, MessagingProvider, OutboundMessage,
    RawInboundMessage, TimeWindow, Venue, VenueProvider, VenueQuery,
};
use stina_store::InMemoryRequestStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted language model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays canned responses in order and records every request it saw.
#[derive(Default)]
pub struct ScriptedModel {
    chat_script: Mutex<VecDeque<Result<ChatResponse>>>,
    structured_script: Mutex<VecDeque<Result<Value>>>,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, response: Result<ChatResponse>) {
        self.chat_script.lock().push_back(response);
    }

    pub fn push_structured(&self, response: Result<Value>) {
        self.structured_script.lock().push_back(response);
    }

    pub fn chat_rounds_seen(&self) -> usize {
        self.chat_requests.lock().len()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.chat_requests.lock().push(req);
        self.chat_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Provider {
                provider: "scripted".into(),
                message: "chat script exhausted".into(),
            }))
    }

    async fn generate_structured(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
        self.structured_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Provider {
                provider: "scripted".into(),
                message: "structured script exhausted".into(),
            }))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

/// A response that only calls tools.
pub fn tool_response(calls: Vec<(&str, Value)>) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                call_id: format!("call-{i}"),
                tool_name: name.into(),
                arguments,
            })
            .collect(),
        usage: None,
        model: "scripted".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

/// A plain-text final response (usually a terminal decision).
pub fn text_response(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: Vec::new(),
        usage: None,
        model: "scripted".into(),
        finish_reason: Some("stop".into()),
    }
}

/// A well-formed intent payload for the extraction stage.
pub fn valid_intent() -> Value {
    serde_json::json!({
        "initiator": { "email": "anna@example.com", "name": "Anna" },
        "invitees": [{ "email": "bo@example.com", "name": "Bo" }],
        "purpose": "quarterly budget sync",
        "timeframe": "Tuesday afternoon",
        "duration_minutes": 30
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator mocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MockCalendar {
    pub busy: Mutex<Vec<BusyInterval>>,
    pub created: Mutex<Vec<EventDraft>>,
}

#[async_trait::async_trait]
impl CalendarProvider for MockCalendar {
    async fn list_free_busy(&self, window: TimeWindow) -> Result<Vec<BusyInterval>> {
        Ok(self
            .busy
            .lock()
            .iter()
            .copied()
            .filter(|b| b.start < window.end && window.start < b.end)
            .collect())
    }

    async fn create_event(&self, draft: EventDraft) -> Result<CreatedEvent> {
        let mut created = self.created.lock();
        created.push(draft);
        Ok(CreatedEvent {
            event_id: format!("evt-{}", created.len()),
            calendar_id: "primary".into(),
        })
    }
}

#[derive(Default)]
pub struct MockVenues {
    pub venues: Vec<Venue>,
}

#[async_trait::async_trait]
impl VenueProvider for MockVenues {
    async fn search(&self, query: VenueQuery) -> Result<Vec<Venue>> {
        Ok(self
            .venues
            .iter()
            .take(query.limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockMessaging {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub inbound: Mutex<VecDeque<RawInboundMessage>>,
}

impl MockMessaging {
    pub fn push_inbound(&self, raw: RawInboundMessage) {
        self.inbound.lock().push_back(raw);
    }
}

#[async_trait::async_trait]
impl MessagingProvider for MockMessaging {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt> {
        let mut sent = self.sent.lock();
        sent.push(message);
        Ok(DeliveryReceipt {
            message_id: format!("out-{}", sent.len()),
            thread_id: None,
            delivered_at: Utc::now(),
        })
    }

    async fn list_unprocessed(&self) -> Result<Vec<RawInboundMessage>> {
        Ok(self.inbound.lock().drain(..).collect())
    }
}

#[derive(Default)]
pub struct MockContacts {
    pub records: Vec<ContactRecord>,
}

#[async_trait::async_trait]
impl ContactsProvider for MockContacts {
    async fn lookup(&self, identifier: &str, strict: bool) -> Result<Option<ContactRecord>> {
        let exact = self
            .records
            .iter()
            .find(|r| r.email.eq_ignore_ascii_case(identifier));
        if strict {
            return Ok(exact.cloned());
        }
        Ok(exact
            .or_else(|| {
                self.records.iter().find(|r| {
                    r.name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&identifier.to_lowercase()))
                })
            })
            .cloned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub scheduler: Scheduler,
    pub model: Arc<ScriptedModel>,
    pub calendar: Arc<MockCalendar>,
    pub messaging: Arc<MockMessaging>,
    pub repo: Arc<InMemoryRequestStore>,
}

pub fn harness() -> Harness {
    harness_with_config(Config::default())
}

pub fn harness_with_config(config: Config) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let model = Arc::new(ScriptedModel::new());
    let calendar = Arc::new(MockCalendar::default());
    let messaging = Arc::new(MockMessaging::default());
    let venues = Arc::new(MockVenues::default());
    let contacts = Arc::new(MockContacts::default());
    let repo = Arc::new(InMemoryRequestStore::new());

    let scheduler = Scheduler::new(
        config,
        model.clone(),
        calendar.clone(),
        venues,
        messaging.clone(),
        contacts,
        repo.clone(),
    );

    Harness {
        scheduler,
        model,
        calendar,
        messaging,
        repo,
    }
}

/// An inbound email asking for a meeting.
pub fn inbound_email(message_id: &str, sender: &str) -> RawInboundMessage {
    RawInboundMessage {
        message_id: message_id.into(),
        sender: sender.into(),
        subject: Some("Budget sync".into()),
        body: "Could we find 30 minutes on Tuesday afternoon to go over the budget?".into(),
        received_at: Utc::now(),
        thread_id: None,
    }
}
