pub mod attributes;
pub mod audit;
pub mod config;
pub mod domain;
pub mod engine;
pub mod observability;
pub mod policy;
pub mod rights;

pub use config::Config;
pub use domain::{
    AccessRequest, AttributeSet, AttributeValue, CaseId, CaseStatus, Decision, Effect, Policy,
    RightsCase, RightsOperation,
};
pub use engine::DecisionEngine;
pub use rights::RightsOrchestrator;
