//! Run group: start every actor, stop all of them when the first one returns.
//!
//! ```text
//! add(a0) add(a1) ... add(aN)
//!        │
//!      run() ──► spawn a0.run() … aN.run()      (one task per actor)
//!        │             │ (index, result)
//!        │             ▼
//!        │     completion channel (capacity N)
//!        ▼
//!   first completion ──► a0.interrupt(err) … aN.interrupt(err)
//!        │
//!   drain N-1 remaining completions (errors logged, discarded)
//!        ▼
//!     Outcome { actor, result }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::lifecycle::actor::{Actor, ActorId};
use crate::observability::metrics;
use crate::Error;

/// Result of a group run: the first actor to return and what it returned.
#[derive(Debug)]
pub struct Outcome {
    /// `None` only when the group had no actors.
    pub actor: Option<ActorId>,
    pub result: Result<(), Error>,
}

impl Outcome {
    fn empty() -> Self {
        Self {
            actor: None,
            result: Ok(()),
        }
    }

    /// The error carried by the first completion, if any.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// One actor finishing its run.
struct Completion {
    index: usize,
    result: Result<(), Error>,
}

/// An ordered set of actors that live and die together.
///
/// Registration order only decides the order in which `interrupt` is fanned
/// out; it has no influence on which completion becomes the [`Outcome`].
pub struct Group<A> {
    actors: Vec<Arc<A>>,
}

impl<A: Actor> Group<A> {
    pub fn new() -> Self {
        Self { actors: Vec::new() }
    }

    /// Register an actor.
    pub fn add(&mut self, actor: A) -> &mut Self {
        self.add_shared(Arc::new(actor))
    }

    /// Register an actor the caller keeps a handle to, e.g. to inspect it
    /// after the run.
    pub fn add_shared(&mut self, actor: Arc<A>) -> &mut Self {
        self.actors.push(actor);
        self
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Run every actor concurrently and reconcile them into one [`Outcome`].
    ///
    /// Returns only after every actor's `run` has returned. There is no
    /// timeout here: an actor that ignores `interrupt` stalls the group.
    pub async fn run(self) -> Outcome {
        if self.actors.is_empty() {
            return Outcome::empty();
        }

        let ids: Vec<ActorId> = self
            .actors
            .iter()
            .enumerate()
            .map(|(index, actor)| ActorId {
                index,
                name: actor.name().to_string(),
            })
            .collect();

        let (tx, mut rx) = mpsc::channel::<Completion>(self.actors.len());

        for (id, actor) in ids.iter().zip(&self.actors) {
            let actor = Arc::clone(actor);
            let tx = tx.clone();
            let index = id.index;
            let name = id.name.clone();
            let span = tracing::info_span!("actor", name = %name);

            tokio::spawn(
                async move {
                    tracing::debug!("actor starting");
                    let result = AssertUnwindSafe(actor.run())
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(Error::Panicked { actor: name }));
                    // Capacity equals the actor count, so this never waits.
                    let _ = tx.send(Completion { index, result }).await;
                }
                .instrument(span),
            );
        }
        drop(tx);

        // Every task holds a sender until it has reported, so the channel
        // only closes early if the runtime itself is shutting down.
        let Some(first) = rx.recv().await else {
            tracing::error!("run group lost its actors before any completed");
            return Outcome::empty();
        };

        let first_id = ids[first.index].clone();
        record_completion(&first_id, &first.result);
        match &first.result {
            Ok(()) => tracing::info!(actor = %first_id, "actor finished, stopping group"),
            Err(err) => tracing::error!(actor = %first_id, error = %err, "actor failed, stopping group"),
        }

        let cause = first.result.as_ref().err();
        for actor in &self.actors {
            actor.interrupt(cause);
        }

        let mut remaining = self.actors.len() - 1;
        while remaining > 0 {
            let Some(next) = rx.recv().await else {
                tracing::warn!(remaining, "completion channel closed early");
                break;
            };
            remaining -= 1;
            let id = &ids[next.index];
            record_completion(id, &next.result);
            match &next.result {
                Ok(()) => tracing::debug!(actor = %id, remaining, "actor stopped"),
                Err(err) => tracing::debug!(actor = %id, remaining, error = %err, "actor stopped with error"),
            }
        }

        Outcome {
            actor: Some(first_id),
            result: first.result,
        }
    }
}

impl<A: Actor> Default for Group<A> {
    fn default() -> Self {
        Self::new()
    }
}

fn record_completion(id: &ActorId, result: &Result<(), Error>) {
    metrics::record_actor_exit(&id.name, result.is_ok());
}
