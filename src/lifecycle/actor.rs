//! The two-operation actor contract driven by [`Group`](super::group::Group).

use std::fmt;
use std::future::Future;

use crate::Error;

/// A unit of concurrent work owned by a run group.
///
/// `run` is awaited exactly once per group and should only return once the
/// actor has finished its work or has been interrupted. `interrupt` asks a
/// running (or not yet started) actor to stop. It may be called any number
/// of times, from any task, concurrently with `run`, so implementations must
/// be idempotent and must never block.
pub trait Actor: Send + Sync + 'static {
    /// Human-readable identity used in logs and metrics.
    fn name(&self) -> &str;

    /// Run until done, failed, or interrupted.
    fn run(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Request early termination. `cause` is the error (if any) returned by
    /// the actor whose completion triggered the shutdown.
    fn interrupt(&self, cause: Option<&Error>);
}

/// Identity of a registered actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorId {
    /// Position in the group, in registration order.
    pub index: usize,
    /// Value of [`Actor::name`] at registration.
    pub name: String,
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}
