/// Read routing across replicas with fallback to the primary
///
/// Reads go to the replica pinned to the request, or the next one in
/// rotation. Queries cancelled by replication conflicts are retried on other
/// replicas (up to `conflict_retry_factor` times per replica), replicas that
/// fail with connection errors are taken offline, and once no replica is left
/// the read runs on the primary. Work on the primary is retried with
/// exponential backoff when the connection fails.
pub mod classify;
pub mod proxy;
pub mod retry;

pub use classify::{DriverErrors, ErrorClass, ErrorClassifier, StandardDriverErrors};
pub use proxy::ConnectionProxy;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LoadBalancingConfig;
use crate::core::connection::{ConnectionPool, DatabaseConnection, QueryFuture};
use crate::core::features::{FeatureToggles, LOAD_BALANCING, QUERY_CACHE};
use crate::core::session::RequestContext;
use crate::core::WriteLocation;
use crate::error::{AnclaError, AnclaResult, BoxError};
use crate::host::{Host, HostList};
use crate::sticking::ReplicationTracker;

/// Routes database work between the primary and its replicas
pub struct LoadBalancer<P: ConnectionPool> {
    primary: Arc<P>,
    host_list: HostList<P>,
    classifier: Arc<ErrorClassifier>,
    toggles: Arc<dyn FeatureToggles>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
}

impl<P: ConnectionPool> LoadBalancer<P> {
    pub fn new(primary: Arc<P>, host_list: HostList<P>, toggles: Arc<dyn FeatureToggles>) -> Self {
        Self {
            primary,
            host_list,
            classifier: Arc::new(ErrorClassifier::default()),
            toggles,
            sleeper: Arc::new(TokioSleeper),
            retry: RetryPolicy::default(),
        }
    }

    /// Build from configuration, opening a pool per configured replica
    ///
    /// Hosts share `classifier` with the load balancer and are shuffled.
    pub fn from_config<F>(
        config: &LoadBalancingConfig,
        primary: Arc<P>,
        toggles: Arc<dyn FeatureToggles>,
        classifier: Arc<ErrorClassifier>,
        mut connect: F,
    ) -> AnclaResult<Self>
    where
        F: FnMut(&str) -> Result<Arc<P>, BoxError>,
    {
        let settings = config.host_settings();
        let mut hosts = Vec::with_capacity(config.hosts.len());

        for address in &config.hosts {
            let pool = connect(address).map_err(AnclaError::Query)?;
            hosts.push(
                Host::new(address.as_str(), pool)
                    .with_settings(settings)
                    .with_classifier(Arc::clone(&classifier)),
            );
        }

        tracing::info!(
            hosts = ?config.hosts,
            max_replication_lag_time_sec = config.max_replication_lag_time_sec,
            "Configured database load balancing"
        );

        Ok(Self::new(primary, HostList::shuffled(hosts), toggles)
            .with_classifier(classifier)
            .with_retry_policy(config.retry_policy()))
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn host_list(&self) -> &HostList<P> {
        &self.host_list
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Whether there are replicas to balance over
    pub fn is_configured(&self) -> bool {
        !self.host_list.is_empty()
    }

    pub fn load_balancing_enabled(&self) -> bool {
        self.toggles.enabled(LOAD_BALANCING)
    }

    /// Run a read-only operation on a replica, falling back to the primary
    ///
    /// Errors that are neither replication conflicts nor connection errors
    /// are returned straight away.
    pub async fn read<T, F>(&self, ctx: &mut RequestContext<P>, mut op: F) -> AnclaResult<T>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        let max_conflict_retries = self.retry.max_conflict_retries(self.host_list.len());
        let mut conflict_retried = 0;

        while let Some(host) = self.host(ctx).await {
            let error = match self.run_on_pinned_host(ctx, &mut op).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.classifier.classify(error.as_ref()) {
                ErrorClass::SerializationConflict => {
                    let will_retry = conflict_retried < max_conflict_retries;

                    tracing::warn!(
                        event = "host_query_conflict",
                        conflict_retried,
                        will_retry,
                        db_host = %host.address(),
                        host_list_length = self.host_list.len(),
                        "Query conflict on host"
                    );

                    if !will_retry {
                        break;
                    }
                    conflict_retried += 1;
                    self.release_host(ctx);
                }
                ErrorClass::Connection => {
                    host.offline();
                    self.release_host(ctx);
                }
                ErrorClass::Other => return Err(AnclaError::Query(error)),
            }
        }

        tracing::warn!(
            event = "no_secondaries_available",
            conflict_retried,
            host_list_length = self.host_list.len(),
            "No secondaries were available, using primary instead"
        );

        self.read_write(op).await
    }

    /// Run an operation on the primary
    pub async fn read_write<T, F>(&self, op: F) -> AnclaResult<T>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        self.retry_with_backoff(op).await
    }

    /// Run an operation on the primary, retrying connection errors with the
    /// configured attempts and delay
    pub async fn retry_with_backoff<T, F>(&self, op: F) -> AnclaResult<T>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        self.retry_with_backoff_using(self.retry.primary_retries, self.retry.primary_retry_delay, op)
            .await
    }

    /// Run an operation on the primary, making up to `retries` attempts
    ///
    /// After each connection error the primary connection is released and the
    /// task sleeps `delay`, which is squared for the following attempt. This
    /// happens after the final attempt too, before its error is returned.
    /// Other errors are returned without sleeping.
    pub async fn retry_with_backoff_using<T, F>(
        &self,
        retries: u32,
        delay: Duration,
        mut op: F,
    ) -> AnclaResult<T>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        let retries = retries.max(1);
        let mut delay = delay;
        let mut last_error = None;

        for attempt in 1..=retries {
            let error = match self.run_on_primary(&mut op).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.is_connection_error(error.as_ref()) {
                return Err(AnclaError::Query(error));
            }

            tracing::warn!(
                event = "primary_connection_error",
                attempt,
                retries,
                delay_sec = delay.as_secs_f64(),
                error = %error,
                "Connection error on primary, backing off"
            );

            self.sleeper.sleep(delay).await;
            delay = retry::next_delay(delay);
            last_error = Some(error);
        }

        Err(AnclaError::Query(
            last_error.unwrap_or_else(|| "no attempt made against the primary".into()),
        ))
    }

    /// Replica pinned to the request, pinning the next online one if needed
    pub async fn host(&self, ctx: &mut RequestContext<P>) -> Option<Arc<Host<P>>> {
        if let Some(host) = ctx.pinned_host() {
            return Some(Arc::clone(host));
        }

        let host = self.host_list.next().await?;
        ctx.pin(Arc::clone(&host));
        Some(host)
    }

    /// Unpin the request's replica, returning its connection with the query
    /// cache disabled. Does nothing when no replica is pinned.
    pub fn release_host(&self, ctx: &mut RequestContext<P>) {
        if ctx.unpin() {
            tracing::trace!("Released pinned replica host");
        }
    }

    /// Return a primary connection to its pool
    pub fn release_primary_connection(&self, connection: P::Connection) {
        self.primary.checkin(connection);
    }

    /// Current write location of the primary
    ///
    /// Fails with [`AnclaError::WriteLocationUnavailable`] when the primary
    /// doesn't report one; that failure is not retried.
    pub async fn primary_write_location(&self) -> AnclaResult<WriteLocation> {
        let location = self
            .read_write(|connection| connection.current_write_location())
            .await?;

        location.ok_or(AnclaError::WriteLocationUnavailable)
    }

    /// Whether every replica has replayed up to `location`
    pub async fn all_caught_up(&self, location: WriteLocation) -> AnclaResult<bool> {
        for host in self.host_list.hosts() {
            if !host.caught_up(location).await {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn is_connection_error(&self, error: &(dyn Error + 'static)) -> bool {
        self.classifier.is_connection_error(error)
    }

    pub fn is_serialization_failure(&self, error: &(dyn Error + 'static)) -> bool {
        self.classifier.is_serialization_failure(error)
    }

    async fn run_on_pinned_host<T, F>(&self, ctx: &mut RequestContext<P>, op: &mut F) -> Result<T, BoxError>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        let query_cache = self.toggles.enabled(QUERY_CACHE);
        let pinned = ctx.pinned_mut().ok_or("no replica pinned to the request")?;
        let connection = pinned.connection(query_cache).await?;

        op(connection).await
    }

    async fn run_on_primary<T, F>(&self, op: &mut F) -> Result<T, BoxError>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        let connection = self.primary.checkout().await?;
        let result = op(&connection).await;
        self.release_primary_connection(connection);
        result
    }
}

#[async_trait]
impl<P: ConnectionPool> ReplicationTracker for LoadBalancer<P> {
    fn is_configured(&self) -> bool {
        LoadBalancer::is_configured(self)
    }

    async fn primary_write_location(&self) -> AnclaResult<WriteLocation> {
        LoadBalancer::primary_write_location(self).await
    }

    async fn all_caught_up(&self, location: WriteLocation) -> AnclaResult<bool> {
        LoadBalancer::all_caught_up(self, location).await
    }
}
