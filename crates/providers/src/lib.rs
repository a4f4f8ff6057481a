//! External collaborator contracts for the Stina scheduling core, plus
//! the concrete OpenAI-compatible language-model adapter.
//!
//! Every collaborator is an `async_trait` seam injected into the engine
//! at construction time — no globals, no ad-hoc clients.

pub mod calendar;
pub mod contacts;
pub mod messaging;
pub mod openai;
pub mod traits;
pub mod venues;

pub use calendar::{BusyInterval, CalendarProvider, CreatedEvent, EventDraft, TimeWindow};
pub use contacts::{ContactRecord, ContactsProvider};
pub use messaging::{DeliveryReceipt, MessagingProvider, OutboundMessage, RawInboundMessage};
pub use openai::OpenAiCompatModel;
pub use traits::{ChatRequest, ChatResponse, LanguageModel, Usage};
pub use venues::{Venue, VenueProvider, VenueQuery};
