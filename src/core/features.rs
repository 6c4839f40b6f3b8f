/// Feature toggles consulted at routing time
use std::collections::HashSet;

/// Route reads to replicas and stick actors to the primary after writes
pub const LOAD_BALANCING: &str = "db_load_balancing";

/// Enable the query cache on the replica connection pinned to a request
pub const QUERY_CACHE: &str = "query_cache_for_load_balancing";

/// Source of feature toggle state
pub trait FeatureToggles: Send + Sync {
    fn enabled(&self, name: &str) -> bool;
}

/// Fixed set of enabled toggles
#[derive(Debug, Clone, Default)]
pub struct StaticToggles {
    enabled: HashSet<String>,
}

impl StaticToggles {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Every toggle ancla knows about, enabled
    pub fn all() -> Self {
        Self::new([LOAD_BALANCING, QUERY_CACHE])
    }
}

impl FeatureToggles for StaticToggles {
    fn enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }
}
