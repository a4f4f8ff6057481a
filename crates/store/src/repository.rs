use stina_domain::error::Result;
use stina_domain::request::{MeetingRequest, RequestStatus, RequestUpdate};

/// Filters for listing meeting requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilters {
    pub status: Option<RequestStatus>,
    /// Match requests where this email appears among the participants.
    pub participant_email: Option<String>,
    /// Only non-terminal requests.
    pub open_only: bool,
}

/// Narrow repository interface over the persistence backend.
#[async_trait::async_trait]
pub trait RequestRepository: Send + Sync {
    /// Fetch a request by id.  `Ok(None)` when absent.
    async fn get(&self, id: &str) -> Result<Option<MeetingRequest>>;

    /// Persist a newly created request.  Fails if the id already exists.
    async fn create(&self, request: MeetingRequest) -> Result<MeetingRequest>;

    /// Apply a partial update atomically and return the updated document.
    ///
    /// When `expected_status` is set, the update only commits if the
    /// stored status still matches — a compare-and-set that keeps two
    /// concurrent orchestration rounds from committing conflicting
    /// transitions.  A mismatch is [`Error::Conflict`] and leaves the
    /// document untouched.
    ///
    /// `updated_at` strictly increases on every successful update.
    ///
    /// [`Error::Conflict`]: stina_domain::Error::Conflict
    async fn update(
        &self,
        id: &str,
        expected_status: Option<RequestStatus>,
        update: RequestUpdate,
    ) -> Result<MeetingRequest>;

    /// List requests matching the filters, most recently updated first.
    async fn query(&self, filters: RequestFilters) -> Result<Vec<MeetingRequest>>;
}
