//! Intent extraction stage.
//!
//! Turns one raw communication into a [`MeetingIntent`] via structured
//! model output.  Validation is all-or-nothing: the model's JSON either
//! deserializes into the full intent shape or the attempt fails.  One
//! retry is made for malformed output (the retry prompt quotes the
//! deserialization error); transport and timeout failures are not
//! retried here.

use std::sync::Arc;
use std::time::Duration;

use stina_domain::config::ExtractionConfig;
use stina_domain::error::{Error, Result};
use stina_domain::intent::MeetingIntent;
use stina_domain::request::{Communication, MeetingRequest};
use stina_providers::LanguageModel;

pub struct ExtractionStage {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ExtractionStage {
    pub fn new(model: Arc<dyn LanguageModel>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Extract the meeting intent from `communication`.
    ///
    /// The whole attempt (including the single malformed-output retry)
    /// runs under the configured timeout.
    pub async fn extract(
        &self,
        request: &MeetingRequest,
        communication: &Communication,
    ) -> Result<MeetingIntent> {
        let prompt = build_prompt(request, communication);

        tokio::time::timeout(self.timeout, self.extract_inner(&prompt))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "extraction for request {} exceeded {}s",
                    request.id,
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn extract_inner(&self, prompt: &str) -> Result<MeetingIntent> {
        let schema = MeetingIntent::json_schema();

        let raw = self.model.generate_structured(prompt, &schema).await?;
        match parse_intent(raw) {
            Ok(intent) => Ok(intent),
            Err(first_error) => {
                tracing::warn!(error = %first_error, "extraction output malformed, retrying once");
                let retry_prompt = format!(
                    "{prompt}\n\nYour previous answer was not valid: {first_error}. \
                     Respond again with a single JSON object matching the schema exactly."
                );
                let raw = self.model.generate_structured(&retry_prompt, &schema).await?;
                parse_intent(raw).map_err(|second_error| {
                    Error::Extraction(format!(
                        "model output did not match the intent schema after retry: {second_error}"
                    ))
                })
            }
        }
    }
}

fn parse_intent(raw: serde_json::Value) -> std::result::Result<MeetingIntent, String> {
    let intent: MeetingIntent = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    if intent.purpose.trim().is_empty() {
        return Err("purpose must not be empty".into());
    }
    if intent.initiator.email.trim().is_empty() {
        return Err("initiator.email must not be empty".into());
    }
    Ok(intent)
}

fn build_prompt(request: &MeetingRequest, communication: &Communication) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You extract structured meeting intent from one inbound message. \
         Capture the requested timeframe verbatim as written; do not resolve \
         dates. Use null for anything the message does not state.\n\n",
    );
    prompt.push_str(&format!(
        "Sender: {}\nChannel: {}\nReceived: {}\n",
        communication.sender,
        communication.channel,
        communication.timestamp.to_rfc3339()
    ));
    if let Some(summary) = &request.context_summary {
        prompt.push_str(&format!("Known context: {summary}\n"));
    }
    prompt.push_str(&format!("\nMessage:\n{}\n", communication.content));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::VecDeque;
    use stina_domain::request::{CommunicationChannel, Creator, RequestStatus};
    use stina_providers::{ChatRequest, ChatResponse};

    struct ScriptedStructured {
        responses: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStructured {
        fn new(responses: Vec<Result<Value>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LanguageModel for ScriptedStructured {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            unreachable!("extraction never uses chat")
        }

        async fn generate_structured(&self, prompt: &str, _schema: &Value) -> Result<Value> {
            self.calls.lock().push(prompt.to_owned());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Extraction("script exhausted".into())))
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    fn request_with_comm() -> (MeetingRequest, Communication) {
        let mut request = MeetingRequest::new(
            Creator {
                email: "anna@example.com".into(),
                channel: CommunicationChannel::Email,
            },
            RequestStatus::AnalysingEmail,
        );
        let comm = Communication::new(
            CommunicationChannel::Email,
            "Can we meet Tuesday 2pm to talk budget?",
            "anna@example.com",
        );
        request.communications.push(comm.clone());
        (request, comm)
    }

    fn valid_intent_json() -> Value {
        serde_json::json!({
            "initiator": { "email": "anna@example.com", "name": "Anna" },
            "invitees": [],
            "purpose": "talk budget",
            "timeframe": "Tuesday 2pm"
        })
    }

    #[tokio::test]
    async fn valid_output_parses_first_try() {
        let model = Arc::new(ScriptedStructured::new(vec![Ok(valid_intent_json())]));
        let stage = ExtractionStage::new(model.clone(), &ExtractionConfig::default());
        let (request, comm) = request_with_comm();

        let intent = stage.extract(&request, &comm).await.unwrap();
        assert_eq!(intent.purpose, "talk budget");
        assert_eq!(intent.timeframe.as_deref(), Some("Tuesday 2pm"));
        assert_eq!(model.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn malformed_output_retries_once_then_succeeds() {
        let model = Arc::new(ScriptedStructured::new(vec![
            Ok(serde_json::json!({ "initiator": { "email": "anna@example.com" } })),
            Ok(valid_intent_json()),
        ]));
        let stage = ExtractionStage::new(model.clone(), &ExtractionConfig::default());
        let (request, comm) = request_with_comm();

        let intent = stage.extract(&request, &comm).await.unwrap();
        assert_eq!(intent.purpose, "talk budget");
        let calls = model.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("was not valid"));
    }

    #[tokio::test]
    async fn re_extracting_the_same_message_yields_the_same_intent() {
        let model = Arc::new(ScriptedStructured::new(vec![
            Ok(valid_intent_json()),
            Ok(valid_intent_json()),
        ]));
        let stage = ExtractionStage::new(model, &ExtractionConfig::default());
        let (request, comm) = request_with_comm();

        let first = stage.extract(&request, &comm).await.unwrap();
        let second = stage.extract(&request, &comm).await.unwrap();
        assert_eq!(first.purpose, second.purpose);
        assert_eq!(first.timeframe, second.timeframe);
        assert_eq!(first.initiator.email, second.initiator.email);
    }

    #[tokio::test]
    async fn twice_malformed_is_typed_extraction_error() {
        let garbage = serde_json::json!({ "nope": true });
        let model = Arc::new(ScriptedStructured::new(vec![
            Ok(garbage.clone()),
            Ok(garbage),
        ]));
        let stage = ExtractionStage::new(model, &ExtractionConfig::default());
        let (request, comm) = request_with_comm();

        let err = stage.extract(&request, &comm).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn empty_purpose_is_rejected() {
        let bad = serde_json::json!({
            "initiator": { "email": "anna@example.com" },
            "purpose": "   "
        });
        let model = Arc::new(ScriptedStructured::new(vec![Ok(bad.clone()), Ok(bad)]));
        let stage = ExtractionStage::new(model, &ExtractionConfig::default());
        let (request, comm) = request_with_comm();

        let err = stage.extract(&request, &comm).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn provider_fault_is_not_retried() {
        let model = Arc::new(ScriptedStructured::new(vec![Err(Error::Http(
            "502".into(),
        ))]));
        let stage = ExtractionStage::new(model.clone(), &ExtractionConfig::default());
        let (request, comm) = request_with_comm();

        let err = stage.extract(&request, &comm).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert_eq!(model.calls.lock().len(), 1);
    }
}
