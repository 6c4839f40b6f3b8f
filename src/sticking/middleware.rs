/// Request lifecycle hooks for sticking
use std::fmt;
use std::sync::Arc;

use crate::core::session::Session;
use crate::error::AnclaResult;
use crate::sticking::Sticking;

/// Someone whose writes must be visible to their own later reads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    pub namespace: String,
    pub id: String,
}

impl Actor {
    pub fn new<N: Into<String>, I: fmt::Display>(namespace: N, id: I) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// Applies sticking around each request for the actors it serves
#[derive(Clone)]
pub struct RequestSticking {
    sticking: Arc<Sticking>,
}

impl RequestSticking {
    pub fn new(sticking: Arc<Sticking>) -> Self {
        Self { sticking }
    }

    pub fn sticking(&self) -> &Arc<Sticking> {
        &self.sticking
    }

    /// Send the request to the primary if any actor's last write hasn't
    /// reached the replicas yet
    pub async fn before_request(&self, session: &mut Session, actors: &[Actor]) -> AnclaResult<()> {
        for actor in actors {
            self.sticking
                .unstick_or_continue_sticking(session, &actor.namespace, &actor.id)
                .await?;
        }
        Ok(())
    }

    /// Stick every actor if the request wrote
    pub async fn after_request(&self, session: &mut Session, actors: &[Actor]) -> AnclaResult<()> {
        for actor in actors {
            self.sticking
                .stick_if_necessary(session, &actor.namespace, &actor.id)
                .await?;
        }
        Ok(())
    }
}
