pub mod collaborator;
pub mod orchestrator;
pub mod retry;
pub mod store;

pub use collaborator::{Collaborator, HandlerError};
pub use orchestrator::{CaseError, RightsOrchestrator};
pub use retry::RetryPolicy;
pub use store::{CaseStore, MemoryCaseStore};
