/// Request-scoped routing state
///
/// A [`RequestContext`] is created when a request starts and dropped when it
/// ends. It carries the session flags sticking relies on and the replica host
/// pinned to the request, together with the connection borrowed from it.
use std::sync::Arc;

use crate::core::connection::{ConnectionPool, DatabaseConnection};
use crate::error::BoxError;
use crate::host::Host;

/// Session flags for one unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    use_primary: bool,
    performed_write: bool,
    ignore_writes: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send every remaining query of this session to the primary
    pub fn use_primary(&mut self) {
        self.use_primary = true;
    }

    pub fn is_using_primary(&self) -> bool {
        self.use_primary
    }

    /// Record a write; unless writes are ignored this also forces the primary
    pub fn write(&mut self) {
        self.performed_write = true;
        if self.ignore_writes {
            return;
        }
        self.use_primary();
    }

    pub fn performed_write(&self) -> bool {
        self.performed_write
    }

    /// Run `f` with writes not forcing the primary
    pub fn ignoring_writes<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.ignore_writes, true);
        let result = f(self);
        self.ignore_writes = previous;
        result
    }
}

/// Replica host pinned to a request
///
/// The connection is checked out on first use and returned to the host's pool
/// when the pin is dropped, with its query cache disabled first if this
/// request enabled it.
pub struct PinnedHost<P: ConnectionPool> {
    host: Arc<Host<P>>,
    connection: Option<P::Connection>,
    query_cache_enabled: bool,
}

impl<P: ConnectionPool> PinnedHost<P> {
    fn new(host: Arc<Host<P>>) -> Self {
        Self {
            host,
            connection: None,
            query_cache_enabled: false,
        }
    }

    pub fn host(&self) -> &Arc<Host<P>> {
        &self.host
    }

    pub fn query_cache_enabled(&self) -> bool {
        self.query_cache_enabled
    }

    /// Connection for this request, checked out on first use
    ///
    /// With `query_cache` set, the connection's query cache is enabled the
    /// first time through and left alone afterwards.
    pub(crate) async fn connection(&mut self, query_cache: bool) -> Result<&P::Connection, BoxError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.host.pool().checkout().await?,
        };

        if query_cache && !self.query_cache_enabled {
            connection.enable_query_cache();
            self.query_cache_enabled = true;
        }

        let connection = self.connection.insert(connection);
        Ok(&*connection)
    }
}

impl<P: ConnectionPool> Drop for PinnedHost<P> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.query_cache_enabled {
                connection.disable_query_cache();
            }
            self.host.pool().checkin(connection);
        }
        self.query_cache_enabled = false;
    }
}

/// Routing state of one request
pub struct RequestContext<P: ConnectionPool> {
    session: Session,
    pinned: Option<PinnedHost<P>>,
}

impl<P: ConnectionPool> RequestContext<P> {
    pub fn new() -> Self {
        Self::with_session(Session::new())
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session,
            pinned: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Host pinned to this request, if any
    pub fn pinned_host(&self) -> Option<&Arc<Host<P>>> {
        self.pinned.as_ref().map(PinnedHost::host)
    }

    pub fn query_cache_enabled(&self) -> bool {
        self.pinned
            .as_ref()
            .map_or(false, PinnedHost::query_cache_enabled)
    }

    pub(crate) fn pin(&mut self, host: Arc<Host<P>>) {
        self.pinned = Some(PinnedHost::new(host));
    }

    pub(crate) fn pinned_mut(&mut self) -> Option<&mut PinnedHost<P>> {
        self.pinned.as_mut()
    }

    /// Drop the pin, releasing its connection. Returns whether a host was pinned.
    pub(crate) fn unpin(&mut self) -> bool {
        self.pinned.take().is_some()
    }
}

impl<P: ConnectionPool> Default for RequestContext<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_forces_primary() {
        let mut session = Session::new();
        assert!(!session.is_using_primary());
        assert!(!session.performed_write());

        session.write();
        assert!(session.performed_write());
        assert!(session.is_using_primary());
    }

    #[test]
    fn test_ignored_writes_are_recorded_but_do_not_force_primary() {
        let mut session = Session::new();

        session.ignoring_writes(|session| session.write());

        assert!(session.performed_write());
        assert!(!session.is_using_primary());

        session.write();
        assert!(session.is_using_primary());
    }

    #[test]
    fn test_ignoring_writes_nests() {
        let mut session = Session::new();

        session.ignoring_writes(|outer| {
            outer.ignoring_writes(|inner| inner.write());
            outer.write();
        });

        assert!(!session.is_using_primary());
    }
}
