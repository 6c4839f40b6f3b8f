/// Replica hosts and their health
///
/// A [`Host`] wraps the connection pool of one replica. It starts out online
/// and is taken offline when queries against it fail with connection errors.
/// Every so often (a random interval between one and two
/// `replica_check_interval`s, so processes don't probe in lockstep) the host
/// re-checks its replication lag and decides again whether it is usable.
pub mod list;

pub use list::HostList;

use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::balancer::classify::ErrorClassifier;
use crate::core::connection::{ConnectionPool, DatabaseConnection, QueryFuture};
use crate::core::WriteLocation;
use crate::error::BoxError;

/// Replication thresholds for a replica host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSettings {
    /// Unreplayed bytes a replica may have and still count as up to date
    pub max_replication_difference: u64,
    /// Replication lag a replica may have and still count as up to date
    pub max_replication_lag_time: Duration,
    /// Base interval between replica status checks
    pub replica_check_interval: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            max_replication_difference: 8 * 1024 * 1024,
            max_replication_lag_time: Duration::from_secs(60),
            replica_check_interval: Duration::from_secs(60),
        }
    }
}

/// One replica database
pub struct Host<P: ConnectionPool> {
    address: String,
    pool: Arc<P>,
    settings: HostSettings,
    classifier: Arc<ErrorClassifier>,
    online: AtomicBool,
    /// Reference point for the millisecond timestamps below
    started_at: Instant,
    last_checked_ms: AtomicU64,
    check_interval_ms: AtomicU64,
}

impl<P: ConnectionPool> fmt::Debug for Host<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("online", &self.is_online())
            .finish()
    }
}

impl<P: ConnectionPool> Host<P> {
    pub fn new<S: Into<String>>(address: S, pool: Arc<P>) -> Self {
        let settings = HostSettings::default();
        Self {
            address: address.into(),
            pool,
            settings,
            classifier: Arc::new(ErrorClassifier::default()),
            online: AtomicBool::new(true),
            started_at: Instant::now(),
            last_checked_ms: AtomicU64::new(0),
            check_interval_ms: AtomicU64::new(sample_interval_ms(settings.replica_check_interval)),
        }
    }

    pub fn with_settings(mut self, settings: HostSettings) -> Self {
        self.settings = settings;
        self.check_interval_ms = AtomicU64::new(sample_interval_ms(settings.replica_check_interval));
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub(crate) fn pool(&self) -> &P {
        &self.pool
    }

    /// Last known health, without triggering a replica status check
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Whether the host can serve reads
    ///
    /// Re-checks the replica's status first when a check is due. Only changes
    /// of health are logged.
    pub async fn online(&self) -> bool {
        if !self.claim_status_check() {
            return self.is_online();
        }

        match self.replica_is_up_to_date().await {
            Ok(up_to_date) => {
                let was_online = self.online.swap(up_to_date, Ordering::AcqRel);
                if up_to_date && !was_online {
                    tracing::info!(
                        event = "host_online",
                        db_host = %self.address,
                        "Host is online after replica status check"
                    );
                } else if !up_to_date && was_online {
                    tracing::warn!(
                        event = "host_offline",
                        db_host = %self.address,
                        "Host is offline after replica status check"
                    );
                }
                up_to_date
            }
            Err(error) => {
                tracing::warn!(
                    event = "host_status_check_failed",
                    db_host = %self.address,
                    connection_error = self.classifier.is_connection_error(error.as_ref()),
                    error = %error,
                    "Replica status check failed"
                );
                self.offline();
                false
            }
        }
    }

    /// Take the host out of rotation and close its idle connections
    pub fn offline(&self) {
        if self.online.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                event = "host_offline",
                db_host = %self.address,
                "Marking host as offline"
            );
            self.pool.disconnect();
        }
    }

    /// Put the host back into rotation
    pub fn mark_online(&self) {
        if !self.online.swap(true, Ordering::AcqRel) {
            tracing::info!(event = "host_online", db_host = %self.address, "Marking host as online");
        }
    }

    /// Whether the replica has replayed everything up to `location`
    ///
    /// A replica whose position can't be read, for whatever reason, is
    /// reported as not caught up.
    pub async fn caught_up(&self, location: WriteLocation) -> bool {
        let replayed = self.query_and_release(|connection| connection.last_replayed_location());

        match replayed.await {
            Ok(None) => true,
            Ok(Some(replayed)) => replayed >= location,
            Err(error) => {
                tracing::warn!(
                    event = "host_caught_up_check_failed",
                    db_host = %self.address,
                    connection_error = self.classifier.is_connection_error(error.as_ref()),
                    error = %error,
                    "Could not read replayed location of replica"
                );
                false
            }
        }
    }

    /// Lag is within either threshold
    ///
    /// A replica may go a while without replaying anything while still being
    /// current, so a small unreplayed byte count counts even if the lag time
    /// is large.
    pub async fn replica_is_up_to_date(&self) -> Result<bool, BoxError> {
        let lag_time = self.query_and_release(|connection| connection.replication_lag()).await?;
        if lag_time.map_or(false, |lag| lag <= self.settings.max_replication_lag_time) {
            return Ok(true);
        }

        let lag_bytes = self.query_and_release(|connection| connection.replication_lag_bytes()).await?;
        Ok(lag_bytes.map_or(false, |lag| lag <= self.settings.max_replication_difference))
    }

    async fn query_and_release<T, F>(&self, query: F) -> Result<T, BoxError>
    where
        F: for<'c> FnOnce(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        let connection = self.pool.checkout().await?;
        let result = query(&connection).await;
        self.pool.checkin(connection);
        result
    }

    /// Decide whether a status check is due and, if so, claim it so
    /// concurrent callers don't all probe the replica at once
    fn claim_status_check(&self) -> bool {
        let now_ms = self.started_at.elapsed().as_millis() as u64;
        let last_ms = self.last_checked_ms.load(Ordering::Acquire);
        let interval_ms = self.check_interval_ms.load(Ordering::Acquire);

        if now_ms.saturating_sub(last_ms) < interval_ms {
            return false;
        }

        let claimed = self
            .last_checked_ms
            .compare_exchange(last_ms, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if claimed {
            self.check_interval_ms.store(
                sample_interval_ms(self.settings.replica_check_interval),
                Ordering::Release,
            );
        }

        claimed
    }
}

fn sample_interval_ms(base: Duration) -> u64 {
    let base_ms = base.as_millis() as u64;
    rand::thread_rng().gen_range(base_ms..=base_ms.saturating_mul(2))
}
