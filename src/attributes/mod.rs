use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::domain::attributes::{keys, AttributeCategory, AttributeValue};
use crate::domain::request::AccessRequest;

/// Errors raised by attribute sources.
///
/// A resolution error never aborts an evaluation; the engine treats the key
/// as absent and records a warning, letting deny-by-default apply.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("attribute source unavailable: {0}")]
    Unavailable(String),

    #[error("attribute source rejected key `{0}`")]
    Rejected(String),
}

/// On-demand attribute source for one category, backed by an external
/// collaborator (identity service, resource registry, clock).
#[async_trait]
pub trait AttributeProvider: Send + Sync {
    fn category(&self) -> AttributeCategory;

    /// Resolve a single key. `Ok(None)` means the source answered and the
    /// attribute genuinely does not exist.
    async fn resolve(
        &self,
        key: &str,
        context_id: &str,
    ) -> Result<Option<AttributeValue>, ResolveError>;

    /// Resolve a batch of keys for one evaluation. Providers deriving values
    /// from shared state (the clock) override this so the keys of a single
    /// evaluation stay mutually consistent.
    async fn resolve_many(
        &self,
        keys: &[&str],
        context_id: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, ResolveError> {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.resolve(key, context_id).await? {
                out.insert(key.to_string(), value);
            }
        }
        Ok(out)
    }
}

/// Fixed-map provider for constant context and test fixtures.
#[derive(Debug)]
pub struct StaticProvider {
    category: AttributeCategory,
    values: HashMap<String, AttributeValue>,
}

impl StaticProvider {
    pub fn new(category: AttributeCategory) -> Self {
        StaticProvider {
            category,
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AttributeProvider for StaticProvider {
    fn category(&self) -> AttributeCategory {
        self.category
    }

    async fn resolve(
        &self,
        key: &str,
        _context_id: &str,
    ) -> Result<Option<AttributeValue>, ResolveError> {
        Ok(self.values.get(key).cloned())
    }
}

/// Business hours per the hospital domain: 08:00 to 18:00.
const BUSINESS_HOURS: std::ops::Range<u32> = 8..18;

/// Environment attributes derived from the clock.
///
/// All keys of one resolution batch are computed from a single timestamp, so
/// `currentHour` and `isBusinessHours` cannot straddle an hour boundary
/// within the same evaluation.
#[derive(Debug)]
pub struct ClockProvider {
    now: fn() -> chrono::DateTime<Utc>,
}

impl ClockProvider {
    pub fn new() -> Self {
        ClockProvider { now: Utc::now }
    }

    #[cfg(test)]
    fn with_clock(now: fn() -> chrono::DateTime<Utc>) -> Self {
        ClockProvider { now }
    }

    fn value_at(now: chrono::DateTime<Utc>, key: &str) -> Option<AttributeValue> {
        let hour = now.hour();
        let weekday = now.weekday().number_from_monday();
        let business_hours = BUSINESS_HOURS.contains(&hour);

        match key {
            keys::CURRENT_HOUR => Some(AttributeValue::Int(hour as i64)),
            keys::DAY_OF_WEEK => Some(AttributeValue::Int(weekday as i64)),
            keys::IS_WEEKEND => Some(AttributeValue::Bool(weekday >= 6)),
            keys::IS_BUSINESS_HOURS => Some(AttributeValue::Bool(business_hours)),
            keys::IS_EMERGENCY_HOURS => Some(AttributeValue::Bool(!business_hours)),
            _ => None,
        }
    }
}

impl Default for ClockProvider {
    fn default() -> Self {
        ClockProvider::new()
    }
}

#[async_trait]
impl AttributeProvider for ClockProvider {
    fn category(&self) -> AttributeCategory {
        AttributeCategory::Environment
    }

    async fn resolve(
        &self,
        key: &str,
        _context_id: &str,
    ) -> Result<Option<AttributeValue>, ResolveError> {
        Ok(Self::value_at((self.now)(), key))
    }

    async fn resolve_many(
        &self,
        keys: &[&str],
        _context_id: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, ResolveError> {
        let now = (self.now)();
        Ok(keys
            .iter()
            .filter_map(|key| Self::value_at(now, key).map(|v| (key.to_string(), v)))
            .collect())
    }
}

/// Registry of providers, consulted for keys a request does not carry.
///
/// The engine resolves the keys referenced by candidate rules up front, so
/// condition evaluation itself stays synchronous.
#[derive(Default)]
pub struct AttributeResolver {
    providers: Vec<Arc<dyn AttributeProvider>>,
}

impl AttributeResolver {
    pub fn new() -> Self {
        AttributeResolver::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn AttributeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Resolve every referenced key absent from the request.
    ///
    /// Keys are batched per category so a provider sees all of an
    /// evaluation's keys in one call. Returns resolved values keyed by
    /// namespaced key, plus one warning per failed resolution. Failures never
    /// propagate.
    pub async fn resolve_missing(
        &self,
        request: &AccessRequest,
        referenced: &BTreeSet<String>,
    ) -> (BTreeMap<String, AttributeValue>, Vec<String>) {
        let mut resolved = BTreeMap::new();
        let mut warnings = Vec::new();

        let mut by_category: HashMap<AttributeCategory, Vec<(&String, &str)>> = HashMap::new();
        for namespaced in referenced {
            if request.lookup(namespaced).is_some() {
                continue;
            }
            let Some((category, key)) = AttributeCategory::split(namespaced) else {
                continue;
            };
            by_category.entry(category).or_default().push((namespaced, key));
        }

        for (category, mut pending) in by_category {
            let context_id = self.context_id(request, category);

            for provider in self.providers.iter().filter(|p| p.category() == category) {
                if pending.is_empty() {
                    break;
                }
                let local: Vec<&str> = pending.iter().map(|(_, key)| *key).collect();
                match provider.resolve_many(&local, context_id).await {
                    Ok(values) => {
                        pending.retain(|(namespaced, key)| match values.get(*key) {
                            Some(value) => {
                                resolved.insert((*namespaced).clone(), value.clone());
                                false
                            }
                            None => true,
                        });
                    }
                    Err(e) => {
                        warn!(category = %category, error = %e, "attribute resolution failed, treating as absent");
                        for (namespaced, _) in &pending {
                            warnings.push(format!("{}: {}", namespaced, e));
                        }
                    }
                }
            }
        }

        (resolved, warnings)
    }

    /// Context id handed to a provider: the identifier of the entity whose
    /// attributes are being resolved.
    fn context_id<'a>(&self, request: &'a AccessRequest, category: AttributeCategory) -> &'a str {
        match category {
            AttributeCategory::Subject => request.subject.get_str(keys::USER_ID).unwrap_or(""),
            AttributeCategory::Resource => request
                .resource
                .get_str(keys::PATIENT_ID)
                .or_else(|| request.resource.get_str(keys::RECORD_ID))
                .unwrap_or(""),
            AttributeCategory::Action | AttributeCategory::Environment => "",
        }
    }
}
