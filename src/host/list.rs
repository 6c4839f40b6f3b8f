/// Round-robin selection over replica hosts
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::connection::ConnectionPool;
use crate::host::Host;

/// Replica hosts plus a shared rotation cursor
///
/// Concurrent callers advance the same cursor. Two racing callers may be
/// handed the same host; rotation stays roughly even, which is all that's
/// needed.
pub struct HostList<P: ConnectionPool> {
    hosts: Vec<Arc<Host<P>>>,
    index: AtomicUsize,
}

impl<P: ConnectionPool> HostList<P> {
    pub fn new(hosts: Vec<Host<P>>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
            index: AtomicUsize::new(0),
        }
    }

    /// Build a list in random order, so processes sharing the same replicas
    /// start their rotation at different hosts
    pub fn shuffled(hosts: Vec<Host<P>>) -> Self {
        let mut list = Self::new(hosts);
        list.hosts.shuffle(&mut rand::thread_rng());
        list
    }

    pub fn hosts(&self) -> &[Arc<Host<P>>] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Next online host in rotation
    ///
    /// Goes around the list at most once; `None` when every host is offline.
    pub async fn next(&self) -> Option<Arc<Host<P>>> {
        if self.hosts.is_empty() {
            return None;
        }

        for _ in 0..self.hosts.len() {
            let index = self.index.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
            let host = &self.hosts[index];

            if host.online().await {
                return Some(Arc::clone(host));
            }
        }

        None
    }

    /// Addresses of all hosts, for logging
    pub fn addresses(&self) -> Vec<&str> {
        self.hosts.iter().map(|host| host.address()).collect()
    }
}
