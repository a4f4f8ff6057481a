//! In-memory request store.
//!
//! A `parking_lot::RwLock<HashMap>` keyed by request id.  Reads clone
//! out; updates mutate under the write lock so the patch application and
//! the compare-and-set are atomic to concurrent readers.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use parking_lot::RwLock;

use stina_domain::error::{Error, Result};
use stina_domain::request::{MeetingRequest, RequestStatus, RequestUpdate};

use crate::repository::{RequestFilters, RequestRepository};

#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, MeetingRequest>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestStore {
    async fn get(&self, id: &str) -> Result<Option<MeetingRequest>> {
        Ok(self.requests.read().get(id).cloned())
    }

    async fn create(&self, request: MeetingRequest) -> Result<MeetingRequest> {
        let mut requests = self.requests.write();
        if requests.contains_key(&request.id) {
            return Err(Error::validation(
                "id",
                format!("request {} already exists", request.id),
            ));
        }
        tracing::debug!(request_id = %request.id, status = %request.status, "request created");
        requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn update(
        &self,
        id: &str,
        expected_status: Option<RequestStatus>,
        update: RequestUpdate,
    ) -> Result<MeetingRequest> {
        let mut requests = self.requests.write();
        let stored = requests
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;

        if let Some(expected) = expected_status {
            if stored.status != expected {
                return Err(Error::Conflict {
                    id: id.to_string(),
                    expected,
                    found: stored.status,
                });
            }
        }

        // Apply to a copy first so a rejected patch leaves the stored
        // document untouched.
        let mut updated = stored.clone();
        updated.apply_update(update)?;

        // updated_at strictly increases even within one clock tick.
        let now = Utc::now();
        updated.updated_at = if now > stored.updated_at {
            now
        } else {
            stored.updated_at + Duration::milliseconds(1)
        };

        *stored = updated.clone();
        Ok(updated)
    }

    async fn query(&self, filters: RequestFilters) -> Result<Vec<MeetingRequest>> {
        let requests = self.requests.read();
        let mut matched: Vec<MeetingRequest> = requests
            .values()
            .filter(|r| {
                if let Some(status) = filters.status {
                    if r.status != status {
                        return false;
                    }
                }
                if filters.open_only && r.status.is_terminal() {
                    return false;
                }
                if let Some(email) = &filters.participant_email {
                    if !r
                        .participants
                        .iter()
                        .any(|p| p.email.eq_ignore_ascii_case(email))
                    {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stina_domain::request::{
        Communication, CommunicationChannel, Creator, Participant, RequestStatus,
    };

    fn new_request() -> MeetingRequest {
        MeetingRequest::new(
            Creator {
                email: "anna@example.com".into(),
                channel: CommunicationChannel::Email,
            },
            RequestStatus::ContextCollection,
        )
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryRequestStore::new();
        let req = store.create(new_request()).await.unwrap();
        let fetched = store.get(&req.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, req.id);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let store = InMemoryRequestStore::new();
        let req = store.create(new_request()).await.unwrap();
        let err = store.create(req).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn updated_at_strictly_increases() {
        let store = InMemoryRequestStore::new();
        let req = store.create(new_request()).await.unwrap();

        let mut last = req.updated_at;
        for i in 0..5 {
            let mut update = RequestUpdate::default();
            update.context_summary = Some(format!("round {i}"));
            let updated = store.update(&req.id, None, update).await.unwrap();
            assert!(updated.updated_at > last);
            last = updated.updated_at;
        }
    }

    #[tokio::test]
    async fn cas_mismatch_is_conflict_and_leaves_document_untouched() {
        let store = InMemoryRequestStore::new();
        let req = store.create(new_request()).await.unwrap();

        let err = store
            .update(
                &req.id,
                Some(RequestStatus::PendingReply),
                RequestUpdate::status(RequestStatus::Scheduled),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let stored = store.get(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::ContextCollection);
        assert_eq!(stored.updated_at, req.updated_at);
    }

    #[tokio::test]
    async fn rejected_patch_leaves_document_untouched() {
        let store = InMemoryRequestStore::new();
        let req = store.create(new_request()).await.unwrap();

        let mut update = RequestUpdate::status(RequestStatus::Completed);
        update.communications.push(Communication::new(
            CommunicationChannel::Email,
            "hello",
            "anna@example.com",
        ));
        let err = store.update(&req.id, None, update).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let stored = store.get(&req.id).await.unwrap().unwrap();
        assert!(stored.communications.is_empty());
        assert_eq!(stored.updated_at, req.updated_at);
    }

    #[tokio::test]
    async fn query_filters_by_status_participant_and_openness() {
        let store = InMemoryRequestStore::new();
        let open = store.create(new_request()).await.unwrap();

        let mut other = new_request();
        other.upsert_participant(Participant::new("bo@example.com"));
        let other = store.create(other).await.unwrap();
        store
            .update(&other.id, None, RequestUpdate::status(RequestStatus::Cancelled))
            .await
            .unwrap();

        let all = store.query(RequestFilters::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let open_only = store
            .query(RequestFilters {
                open_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(open_only.len(), 1);
        assert_eq!(open_only[0].id, open.id);

        let by_participant = store
            .query(RequestFilters {
                participant_email: Some("BO@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_participant.len(), 1);
        assert_eq!(by_participant[0].id, other.id);
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let store = InMemoryRequestStore::new();
        let err = store
            .update("nope", None, RequestUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
