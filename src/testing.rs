/// Scriptable in-memory connection pool for tests
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::balancer::retry::Sleeper;
use crate::core::connection::{ConnectionPool, DatabaseConnection, QueryFuture};
use crate::core::WriteLocation;
use crate::error::{BoxError, QueryError};

/// Failure a fake connection can be scripted to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Connection,
    SerializationConflict,
    Other,
}

impl FakeFailure {
    pub fn to_error(self) -> BoxError {
        match self {
            FakeFailure::Connection => {
                QueryError::new("08006", "server closed the connection unexpectedly").into()
            }
            FakeFailure::SerializationConflict => QueryError::new(
                "40001",
                "canceling statement due to conflict with recovery",
            )
            .into(),
            FakeFailure::Other => {
                QueryError::new("42P01", "relation \"widgets\" does not exist").into()
            }
        }
    }
}

#[derive(Default)]
struct FakeState {
    name: String,
    scripted: Mutex<VecDeque<FakeFailure>>,
    always: Mutex<Option<FakeFailure>>,
    checkout_failure: Mutex<Option<FakeFailure>>,
    write_location: Mutex<Option<WriteLocation>>,
    replayed_location: Mutex<Option<WriteLocation>>,
    replication_lag: Mutex<(Option<Duration>, Option<u64>)>,
    queries: AtomicUsize,
    checkouts: AtomicUsize,
    checkins: AtomicUsize,
    disconnects: AtomicUsize,
    cache_enables: AtomicUsize,
    cache_disables: AtomicUsize,
}

/// Pool handing out [`FakeConnection`]s; clones share state
#[derive(Clone)]
pub struct FakePool {
    state: Arc<FakeState>,
}

impl FakePool {
    pub fn new(name: &str) -> Self {
        let state = FakeState {
            name: name.to_string(),
            replication_lag: Mutex::new((Some(Duration::ZERO), Some(0))),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Fail the next queries, in order, with these failures
    pub fn fail_next(&self, failures: &[FakeFailure]) {
        self.state.scripted.lock().unwrap().extend(failures.iter().copied());
    }

    /// Fail every query once the scripted failures are used up
    pub fn fail_always(&self, failure: Option<FakeFailure>) {
        *self.state.always.lock().unwrap() = failure;
    }

    pub fn fail_checkouts(&self, failure: Option<FakeFailure>) {
        *self.state.checkout_failure.lock().unwrap() = failure;
    }

    pub fn set_write_location(&self, location: Option<WriteLocation>) {
        *self.state.write_location.lock().unwrap() = location;
    }

    pub fn set_replayed_location(&self, location: Option<WriteLocation>) {
        *self.state.replayed_location.lock().unwrap() = location;
    }

    pub fn set_replication_lag(&self, lag: Option<Duration>, lag_bytes: Option<u64>) {
        *self.state.replication_lag.lock().unwrap() = (lag, lag_bytes);
    }

    pub fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.state.checkouts.load(Ordering::SeqCst)
    }

    pub fn checkins(&self) -> usize {
        self.state.checkins.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn cache_enables(&self) -> usize {
        self.state.cache_enables.load(Ordering::SeqCst)
    }

    pub fn cache_disables(&self) -> usize {
        self.state.cache_disables.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    type Connection = FakeConnection;

    async fn checkout(&self) -> Result<FakeConnection, BoxError> {
        if let Some(failure) = *self.state.checkout_failure.lock().unwrap() {
            return Err(failure.to_error());
        }
        self.state.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
        })
    }

    fn checkin(&self, _connection: FakeConnection) {
        self.state.checkins.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connection of a [`FakePool`]
pub struct FakeConnection {
    state: Arc<FakeState>,
}

impl FakeConnection {
    /// Run a query: the next scripted failure, the permanent failure, or the
    /// name of the server that answered
    pub async fn query(&self) -> Result<String, BoxError> {
        self.state.queries.fetch_add(1, Ordering::SeqCst);

        let scripted = self.state.scripted.lock().unwrap().pop_front();
        let failure = scripted.or(*self.state.always.lock().unwrap());

        match failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(self.state.name.clone()),
        }
    }
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    async fn current_write_location(&self) -> Result<Option<WriteLocation>, BoxError> {
        Ok(*self.state.write_location.lock().unwrap())
    }

    async fn last_replayed_location(&self) -> Result<Option<WriteLocation>, BoxError> {
        Ok(*self.state.replayed_location.lock().unwrap())
    }

    async fn replication_lag(&self) -> Result<Option<Duration>, BoxError> {
        Ok(self.state.replication_lag.lock().unwrap().0)
    }

    async fn replication_lag_bytes(&self) -> Result<Option<u64>, BoxError> {
        Ok(self.state.replication_lag.lock().unwrap().1)
    }

    fn enable_query_cache(&self) {
        self.state.cache_enables.fetch_add(1, Ordering::SeqCst);
    }

    fn disable_query_cache(&self) {
        self.state.cache_disables.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records requested sleeps instead of sleeping
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Operation running [`FakeConnection::query`]
pub fn query(connection: &FakeConnection) -> QueryFuture<'_, String> {
    Box::pin(connection.query())
}
