/// Database connection contracts
///
/// ancla never speaks a wire protocol itself. Drivers plug in through these
/// two traits: a pool per database (the primary and every replica) that lends
/// out connections, and the connections themselves, which answer the handful
/// of replication questions the load balancer needs.
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;

use crate::core::WriteLocation;
use crate::error::BoxError;

/// Future returned by an operation run against a borrowed connection
pub type QueryFuture<'c, T> = BoxFuture<'c, Result<T, BoxError>>;

/// A connection checked out of a [`ConnectionPool`]
#[async_trait]
pub trait DatabaseConnection: Send + Sync + 'static {
    /// Current write location of the server (queried on the primary)
    async fn current_write_location(&self) -> Result<Option<WriteLocation>, BoxError>;

    /// Last location replayed by the server, or `None` when it is not
    /// replaying (not in recovery), in which case it is fully caught up
    async fn last_replayed_location(&self) -> Result<Option<WriteLocation>, BoxError>;

    /// Time since the last replayed transaction, `None` if unknown
    async fn replication_lag(&self) -> Result<Option<Duration>, BoxError>;

    /// Bytes received from the primary but not yet replayed, `None` if unknown
    async fn replication_lag_bytes(&self) -> Result<Option<u64>, BoxError>;

    /// Start caching query results on this connection
    fn enable_query_cache(&self) {}

    /// Stop caching query results and drop what was cached
    fn disable_query_cache(&self) {}
}

/// Pool of connections to one database server
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: DatabaseConnection;

    /// Borrow a connection, connecting if needed
    async fn checkout(&self) -> Result<Self::Connection, BoxError>;

    /// Return a borrowed connection
    fn checkin(&self, connection: Self::Connection);

    /// Close every idle connection
    fn disconnect(&self);
}
