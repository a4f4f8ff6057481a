//! The public facade wiring ingestion, extraction, orchestration and the
//! lifecycle together behind one object.
//!
//! Per-request exclusivity is enforced here: extraction and orchestration
//! both take the request's run lock and reject a second trigger with a
//! busy error while one is in flight.

use std::sync::Arc;

use stina_domain::config::Config;
use stina_domain::error::{Error, Result};
use stina_domain::request::{
    Communication, Creator, MeetingRequest, Participant, RequestStatus, RequestUpdate,
};
use stina_domain::intent::ExtractionOutcome;
use stina_providers::{
    CalendarProvider, ContactsProvider, LanguageModel, MessagingProvider, RawInboundMessage,
    VenueProvider,
};
use stina_store::{RequestFilters, RequestRepository};

use crate::extraction::ExtractionStage;
use crate::ingest;
use crate::lifecycle::{self, TransitionFields};
use crate::locks::RequestLockMap;
use crate::orchestrator::{OrchestrationOutcome, Orchestrator};
use crate::tools::ToolRegistry;

pub struct Scheduler {
    repo: Arc<dyn RequestRepository>,
    messaging: Arc<dyn MessagingProvider>,
    extraction: ExtractionStage,
    orchestrator: Orchestrator,
    locks: RequestLockMap,
}

impl Scheduler {
    pub fn new(
        config: Config,
        model: Arc<dyn LanguageModel>,
        calendar: Arc<dyn CalendarProvider>,
        venues: Arc<dyn VenueProvider>,
        messaging: Arc<dyn MessagingProvider>,
        contacts: Arc<dyn ContactsProvider>,
        repo: Arc<dyn RequestRepository>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::new(
            calendar.clone(),
            venues,
            messaging.clone(),
            contacts,
            repo.clone(),
            config.scheduling.clone(),
        ));
        let extraction = ExtractionStage::new(model.clone(), &config.extraction);
        let orchestrator = Orchestrator::new(
            model,
            tools,
            calendar,
            repo.clone(),
            config.orchestrator.clone(),
            config.llm.clone(),
            config.scheduling.clone(),
        );
        Self {
            repo,
            messaging,
            extraction,
            orchestrator,
            locks: RequestLockMap::new(),
        }
    }

    // ── Creation and ingestion ─────────────────────────────────────

    /// Create a request directly (API channel).  Starts in
    /// `context_collection` — there is no email to analyse.
    pub async fn create_meeting_request(
        &self,
        creator: Creator,
        context_summary: Option<String>,
    ) -> Result<MeetingRequest> {
        if creator.email.trim().is_empty() || !creator.email.contains('@') {
            return Err(Error::validation(
                "creator.email",
                format!("'{}' is not an email address", creator.email),
            ));
        }
        let mut request = MeetingRequest::new(creator, RequestStatus::ContextCollection);
        request.context_summary = context_summary;
        self.repo.create(request).await
    }

    /// Mint a new request from an inbound email and persist it.
    pub async fn ingest_email(&self, raw: &RawInboundMessage) -> Result<MeetingRequest> {
        let request = ingest::new_request_from(raw)?;
        let request = self.repo.create(request).await?;
        tracing::info!(request_id = %request.id, sender = %request.creator.email, "request created from email");
        Ok(request)
    }

    /// Append a communication to an existing request.  Terminal requests
    /// accept no further messages.
    pub async fn ingest_communication(
        &self,
        id: &str,
        communication: Communication,
    ) -> Result<MeetingRequest> {
        let request = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        if request.status.is_terminal() {
            return Err(Error::validation(
                "status",
                format!("request {id} is {} and accepts no communications", request.status),
            ));
        }

        let mut update = RequestUpdate::default();
        update
            .participants
            .push(Participant::new(communication.sender.clone()));
        update.communications.push(communication);
        self.repo.update(id, None, update).await
    }

    /// Drain the inbox: append messages that continue an open
    /// conversation with their sender, mint requests for the rest.
    /// Returns the requests touched, in inbox order.
    pub async fn sweep_inbox(&self) -> Result<Vec<MeetingRequest>> {
        let inbound = self.messaging.list_unprocessed().await?;
        let mut touched = Vec::with_capacity(inbound.len());

        for raw in inbound {
            let communication = match ingest::normalize(&raw) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(message_id = %raw.message_id, error = %e, "skipping undeliverable inbound message");
                    continue;
                }
            };

            let open = self
                .repo
                .query(RequestFilters {
                    participant_email: Some(communication.sender.clone()),
                    open_only: true,
                    ..Default::default()
                })
                .await?;

            // Most recently updated open conversation wins; a sender with
            // no open request starts a new one.
            let request = match open.into_iter().next() {
                Some(existing) => {
                    if existing.communications.iter().any(|c| c.id == communication.id) {
                        tracing::debug!(message_id = %communication.id, "duplicate delivery ignored");
                        existing
                    } else {
                        self.ingest_communication(&existing.id, communication).await?
                    }
                }
                None => self.ingest_email(&raw).await?,
            };
            touched.push(request);
        }
        Ok(touched)
    }

    // ── Pipeline stages ────────────────────────────────────────────

    /// Run the extraction stage on the oldest unprocessed communication.
    ///
    /// On success the communication is marked processed and an
    /// email-originated request advances to `context_collection`.  On
    /// failure the typed failure outcome is stored, the communication
    /// stays unprocessed for a retry, and the error is returned.
    /// Terminal requests are rejected.
    pub async fn run_extraction(&self, id: &str) -> Result<MeetingRequest> {
        let _permit = self.locks.try_acquire(id)?;

        let mut request = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        if request.status.is_terminal() {
            return Err(Error::validation(
                "status",
                format!("request {id} is {} and cannot be re-extracted", request.status),
            ));
        }

        // Surface extraction progress to observers before the model call.
        if request.status == RequestStatus::AnalysingEmail {
            request = lifecycle::apply_transition(
                &self.repo,
                id,
                RequestStatus::ProcessingWithStina,
                TransitionFields::default(),
            )
            .await?;
        }

        let communication = request
            .oldest_unprocessed()
            .cloned()
            .ok_or_else(|| Error::Extraction(format!("request {id} has no unprocessed communication")))?;

        match self.extraction.extract(&request, &communication).await {
            Ok(intent) => {
                tracing::info!(request_id = %id, purpose = %intent.purpose, "intent extracted");
                let outcome = ExtractionOutcome::success(intent);
                if request.status == RequestStatus::ProcessingWithStina {
                    let fields = TransitionFields {
                        mark_processed: vec![communication.id],
                        extraction: Some(outcome),
                        ..Default::default()
                    };
                    lifecycle::apply_transition(
                        &self.repo,
                        id,
                        RequestStatus::ContextCollection,
                        fields,
                    )
                    .await
                } else {
                    let mut update = RequestUpdate::default();
                    update.extraction = Some(outcome);
                    update.mark_processed = vec![communication.id];
                    self.repo.update(id, Some(request.status), update).await
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %id, error = %e, "extraction failed");
                let mut update = RequestUpdate::default();
                update.extraction = Some(ExtractionOutcome::failed(e.to_string()));
                self.repo.update(id, None, update).await?;
                Err(e)
            }
        }
    }

    /// Run one orchestrator invocation.  A second trigger while one is in
    /// flight is rejected with a busy error, never queued.
    pub async fn run_orchestration(&self, id: &str) -> Result<OrchestrationOutcome> {
        let _permit = self.locks.try_acquire(id)?;
        self.orchestrator.run(id).await
    }

    // ── Lifecycle and queries ──────────────────────────────────────

    /// Apply an externally requested status transition.
    pub async fn apply_transition(
        &self,
        id: &str,
        target: RequestStatus,
        fields: TransitionFields,
    ) -> Result<MeetingRequest> {
        lifecycle::apply_transition(&self.repo, id, target, fields).await
    }

    pub async fn get_meeting_request(&self, id: &str) -> Result<MeetingRequest> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {id}")))
    }

    pub async fn list_meeting_requests(&self, filters: RequestFilters) -> Result<Vec<MeetingRequest>> {
        self.repo.query(filters).await
    }
}
