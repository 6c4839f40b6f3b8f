/// Read-your-writes consistency for actors
///
/// After an actor (a user, a runner, ...) writes, the primary's write
/// location is stored under a key for that actor. Until every replica has
/// replayed past it, requests for the actor read from the primary. Markers
/// expire on their own, so an actor is never stuck for longer than the TTL.
pub mod cache;
pub mod middleware;

pub use cache::{MemoryCache, SharedCache};
pub use middleware::{Actor, RequestSticking};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StickingConfig;
use crate::core::features::{FeatureToggles, LOAD_BALANCING};
use crate::core::session::Session;
use crate::core::WriteLocation;
use crate::error::{AnclaError, AnclaResult};

pub const DEFAULT_KEY_PREFIX: &str = "database-load-balancing/write-location";

pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(30);

/// What sticking needs to know about replication
#[async_trait]
pub trait ReplicationTracker: Send + Sync {
    /// Whether any replicas exist
    fn is_configured(&self) -> bool;

    async fn primary_write_location(&self) -> AnclaResult<WriteLocation>;

    async fn all_caught_up(&self, location: WriteLocation) -> AnclaResult<bool>;
}

/// Sticks actors to the primary after they write
pub struct Sticking {
    tracker: Arc<dyn ReplicationTracker>,
    cache: Arc<dyn SharedCache>,
    toggles: Arc<dyn FeatureToggles>,
    expiration: Duration,
    key_prefix: String,
}

impl Sticking {
    pub fn new(
        tracker: Arc<dyn ReplicationTracker>,
        cache: Arc<dyn SharedCache>,
        toggles: Arc<dyn FeatureToggles>,
    ) -> Self {
        Self {
            tracker,
            cache,
            toggles,
            expiration: DEFAULT_EXPIRATION,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn from_config(
        config: &StickingConfig,
        tracker: Arc<dyn ReplicationTracker>,
        cache: Arc<dyn SharedCache>,
        toggles: Arc<dyn FeatureToggles>,
    ) -> Self {
        Self::new(tracker, cache, toggles)
            .with_expiration(config.expiration())
            .with_key_prefix(config.key_prefix.clone())
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_key_prefix<S: Into<String>>(mut self, key_prefix: S) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Whether load balancing is switched on and has replicas to use
    pub fn enabled(&self) -> bool {
        self.tracker.is_configured() && self.toggles.enabled(LOAD_BALANCING)
    }

    /// Stick the actor if the session wrote anything
    pub async fn stick_if_necessary<I: fmt::Display>(
        &self,
        session: &mut Session,
        namespace: &str,
        id: I,
    ) -> AnclaResult<()> {
        if !self.enabled() || !session.performed_write() {
            return Ok(());
        }

        self.stick(session, namespace, id).await
    }

    /// Send the actor to the primary until replicas have caught up with the
    /// primary's current write location
    pub async fn stick<I: fmt::Display>(
        &self,
        session: &mut Session,
        namespace: &str,
        id: I,
    ) -> AnclaResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.mark_primary_write_location(namespace, id).await?;
        session.use_primary();
        Ok(())
    }

    /// Stick several actors of one namespace, fetching the write location once
    pub async fn bulk_stick<I, It>(&self, session: &mut Session, namespace: &str, ids: It) -> AnclaResult<()>
    where
        I: fmt::Display,
        It: IntoIterator<Item = I>,
    {
        if !self.enabled() {
            return Ok(());
        }

        let location = self.tracker.primary_write_location().await?;
        for id in ids {
            self.set_write_location_for(namespace, id, location).await?;
        }

        session.use_primary();
        Ok(())
    }

    /// Record the primary's write location for the actor
    ///
    /// Works whenever replicas are configured, even with load balancing
    /// switched off, so processes that don't balance still publish locations
    /// for those that do.
    pub async fn mark_primary_write_location<I: fmt::Display>(&self, namespace: &str, id: I) -> AnclaResult<()> {
        if !self.tracker.is_configured() {
            return Ok(());
        }

        let location = self.tracker.primary_write_location().await?;
        self.set_write_location_for(namespace, id, location).await
    }

    pub async fn unstick<I: fmt::Display>(&self, namespace: &str, id: I) -> AnclaResult<()> {
        self.cache
            .delete(&self.key_for(namespace, id))
            .await
            .map_err(AnclaError::Cache)
    }

    /// Whether replicas have caught up with the actor's last write
    ///
    /// An actor without a marker is caught up. Once caught up, the marker is
    /// removed.
    pub async fn all_caught_up<I: fmt::Display>(&self, namespace: &str, id: I) -> AnclaResult<bool> {
        let key = self.key_for(namespace, id);
        let location = match self.read_marker(&key).await? {
            Some(location) => location,
            None => return Ok(true),
        };

        let caught_up = self.tracker.all_caught_up(location).await?;
        if caught_up {
            self.cache.delete(&key).await.map_err(AnclaError::Cache)?;
            tracing::debug!(key = %key, location = %location, "Replicas caught up, unsticking");
        }

        Ok(caught_up)
    }

    /// Keep the actor on the primary while replicas are behind its last write
    pub async fn unstick_or_continue_sticking<I: fmt::Display>(
        &self,
        session: &mut Session,
        namespace: &str,
        id: I,
    ) -> AnclaResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        if !self.all_caught_up(namespace, id).await? {
            session.use_primary();
        }
        Ok(())
    }

    /// Write location stored for the actor, if any
    pub async fn last_write_location_for<I: fmt::Display>(
        &self,
        namespace: &str,
        id: I,
    ) -> AnclaResult<Option<WriteLocation>> {
        self.read_marker(&self.key_for(namespace, id)).await
    }

    /// Cache key of the actor's marker
    pub fn key_for<I: fmt::Display>(&self, namespace: &str, id: I) -> String {
        Self::key_with_prefix(&self.key_prefix, namespace, id)
    }

    pub fn key_with_prefix<I: fmt::Display>(key_prefix: &str, namespace: &str, id: I) -> String {
        format!("{}/{}/{}", key_prefix, namespace, id)
    }

    async fn read_marker(&self, key: &str) -> AnclaResult<Option<WriteLocation>> {
        let value = self.cache.get(key).await.map_err(AnclaError::Cache)?;
        value.map(|value| value.parse()).transpose()
    }

    async fn set_write_location_for<I: fmt::Display>(
        &self,
        namespace: &str,
        id: I,
        location: WriteLocation,
    ) -> AnclaResult<()> {
        let key = self.key_for(namespace, id);
        self.cache
            .set(&key, &location.to_string(), self.expiration)
            .await
            .map_err(AnclaError::Cache)?;

        tracing::debug!(
            event = "write_location_stored",
            key = %key,
            location = %location,
            expiration_sec = self.expiration.as_secs(),
            "Stored primary write location"
        );
        Ok(())
    }
}
