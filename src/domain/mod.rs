pub mod attributes;
pub mod case;
pub mod decision;
pub mod policy;
pub mod request;

pub use attributes::{keys, AttributeCategory, AttributeSet, AttributeValue};
pub use case::{
    CaseId, CaseStatus, ExportPayload, RightsCase, RightsOperation, SubtaskRecord, SubtaskState,
};
pub use decision::{Decision, Effect};
pub use policy::{Condition, Policy, Rule};
pub use request::{AccessRequest, AccessRequestBuilder};
