//! Lifecycle state machine.
//!
//! The transition table itself lives on [`RequestStatus`]; this module
//! validates an edge against the live document and commits it atomically
//! through the repository's compare-and-set, so two orchestration rounds
//! can never commit conflicting transitions on the same request.

use std::sync::Arc;

use stina_domain::error::{Error, Result};
use stina_domain::intent::ExtractionOutcome;
use stina_domain::request::{
    MeetingRequest, ProposedTime, RequestMetadata, RequestStatus, RequestUpdate, ScheduledEvent,
};
use stina_store::RequestRepository;

/// Field updates that ride along with a transition in the same persisted
/// write.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub context_summary: Option<String>,
    pub proposed_times: Option<Vec<ProposedTime>>,
    pub metadata: Option<RequestMetadata>,
    /// `None` = leave unchanged, `Some(None)` = clear, `Some(Some(_))` = set.
    pub scheduled_event: Option<Option<ScheduledEvent>>,
    /// Communication IDs to flip processed in the same write.
    pub mark_processed: Vec<String>,
    pub extraction: Option<ExtractionOutcome>,
    /// `None` = leave unchanged, `Some(None)` = clear, `Some(Some(_))` = set.
    pub last_error: Option<Option<String>>,
}

/// Validate the edge `from -> to` against the transition table.
pub fn check_transition(from: RequestStatus, to: RequestStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

/// Apply a status transition plus accompanying field updates in a single
/// persisted write.
///
/// Fails with `InvalidTransition` when the edge is not in the table, and
/// with `Conflict` when another writer moved the status between our read
/// and the commit.  No retry is attempted here — the caller decides.
///
/// Transitions to `rescheduled` or `cancelled` clear the scheduled event
/// in the same update unless the caller explicitly supplies a
/// replacement (`completed` keeps it).
pub async fn apply_transition(
    repo: &Arc<dyn RequestRepository>,
    id: &str,
    target: RequestStatus,
    fields: TransitionFields,
) -> Result<MeetingRequest> {
    let current = repo
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("request {id}")))?;

    check_transition(current.status, target)?;

    let mut update = RequestUpdate {
        status: Some(target),
        context_summary: fields.context_summary,
        proposed_times: fields.proposed_times,
        scheduled_event: fields.scheduled_event,
        metadata: fields.metadata,
        mark_processed: fields.mark_processed,
        extraction: fields.extraction,
        last_error: fields.last_error,
        ..Default::default()
    };
    if matches!(target, RequestStatus::Rescheduled | RequestStatus::Cancelled)
        && update.scheduled_event.is_none()
    {
        update.scheduled_event = Some(None);
    }

    let updated = repo.update(id, Some(current.status), update).await?;
    tracing::info!(
        request_id = %id,
        from = %current.status,
        to = %target,
        "transition applied"
    );
    Ok(updated)
}
