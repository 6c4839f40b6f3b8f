/// Ancla - replica-aware read routing for PostgreSQL-style primary/replica setups
///
/// Reads are spread round-robin over streaming replicas; writes and anything
/// that must see them go to the primary. Actors that just wrote are "stuck" to
/// the primary through a write-location marker in a shared cache until every
/// replica has replayed past that location.
///
/// The database driver and the shared cache are reached through the
/// [`ConnectionPool`] and [`SharedCache`] traits.
pub mod balancer;
pub mod config;
pub mod core;
pub mod error;
pub mod host;
pub mod sticking;

#[cfg(test)]
mod testing;

pub use crate::balancer::{ConnectionProxy, ErrorClass, ErrorClassifier, LoadBalancer, RetryPolicy};
pub use crate::config::Config;
pub use crate::core::connection::{ConnectionPool, DatabaseConnection, QueryFuture};
pub use crate::core::features::{FeatureToggles, StaticToggles};
pub use crate::core::session::{RequestContext, Session};
pub use crate::core::WriteLocation;
pub use crate::error::{AnclaError, AnclaResult, BoxError, QueryError};
pub use crate::host::{Host, HostList, HostSettings};
pub use crate::sticking::{Actor, MemoryCache, RequestSticking, SharedCache, Sticking};
