/// Statement-level entry point over the load balancer
use std::sync::Arc;

use crate::balancer::LoadBalancer;
use crate::core::connection::{ConnectionPool, QueryFuture};
use crate::core::session::RequestContext;
use crate::error::AnclaResult;

/// Sends reads and writes to the right database for a request
pub struct ConnectionProxy<P: ConnectionPool> {
    balancer: Arc<LoadBalancer<P>>,
}

impl<P: ConnectionPool> Clone for ConnectionProxy<P> {
    fn clone(&self) -> Self {
        Self {
            balancer: Arc::clone(&self.balancer),
        }
    }
}

impl<P: ConnectionPool> ConnectionProxy<P> {
    pub fn new(balancer: Arc<LoadBalancer<P>>) -> Self {
        Self { balancer }
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer<P>> {
        &self.balancer
    }

    /// Run a read
    ///
    /// Goes to the primary once the session uses it, or when load balancing
    /// is switched off; otherwise to a replica.
    pub async fn select<T, F>(&self, ctx: &mut RequestContext<P>, op: F) -> AnclaResult<T>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        if ctx.session().is_using_primary() || !self.balancer.load_balancing_enabled() {
            self.balancer.read_write(op).await
        } else {
            self.balancer.read(ctx, op).await
        }
    }

    /// Run a write on the primary, recording it on the session first
    pub async fn write<T, F>(&self, ctx: &mut RequestContext<P>, op: F) -> AnclaResult<T>
    where
        F: for<'c> FnMut(&'c P::Connection) -> QueryFuture<'c, T>,
    {
        ctx.session_mut().write();
        self.balancer.read_write(op).await
    }
}
