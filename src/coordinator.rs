//! Cross-connection lock coordination.
//!
//! Connections opened against the same database run independent shells, so
//! SQLite's own locking is all that stands between two writers. A lone
//! connection needs nothing more. When a second connection joins, the first
//! is suspended until its in-flight request finishes, and from then on a
//! shared read/write lock serializes executions against every other
//! request in the group. The lock is never taken away again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot, watch};

const TARGET: &str = "shelldb::coordinator";

/// The group's lock, absent until the group first has two members.
#[derive(Debug)]
pub(crate) struct LockSlot {
    tx: watch::Sender<Option<Arc<RwLock<()>>>>,
}

impl Default for LockSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LockSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Create the lock and wake everyone waiting for it. Idempotent.
    pub fn activate(&self) -> bool {
        let activated = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(Arc::new(RwLock::new(())));
            true
        });
        if activated {
            debug!(target: TARGET, "Shared lock activated");
        }
        activated
    }

    pub fn current(&self) -> Option<Arc<RwLock<()>>> {
        self.tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolve once the lock is active.
    pub async fn wait_active(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so this cannot fail
        let _ = rx.wait_for(Option::is_some).await;
    }
}

/// Which side of the shared lock a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Unlocked,
    Shared,
    Exclusive,
}

impl LockMode {
    pub async fn acquire(self, lock: Arc<RwLock<()>>) -> Option<LockGuard> {
        match self {
            LockMode::Unlocked => None,
            LockMode::Shared => Some(LockGuard::Shared(lock.read_owned().await)),
            LockMode::Exclusive => Some(LockGuard::Exclusive(lock.write_owned().await)),
        }
    }
}

#[derive(Debug)]
pub(crate) enum LockGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// A lock guard shared between a caller and the reader task.
///
/// Whoever is done with the request first releases it: the caller once a
/// query has produced its first output, the reader once the marker is seen
/// or the request is abandoned.
#[derive(Debug, Clone, Default)]
pub(crate) struct LockHold(Arc<Mutex<Option<LockGuard>>>);

impl LockHold {
    pub fn set(&self, guard: Option<LockGuard>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = guard;
    }

    pub fn release(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

/// How a joining connection is let in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Use the connection right away
    Ready,
    /// Wait for the shared lock to become active first
    AwaitLock,
}

pub(crate) enum Membership {
    Join {
        id: u64,
        /// Fired at most once to ask this connection to suspend
        suspend: oneshot::Sender<()>,
        reply: oneshot::Sender<Admission>,
    },
    Leave {
        id: u64,
    },
}

/// Outcome of a join: the admission plus, when the group first reaches two
/// members, the earlier member's suspend signal.
#[derive(Debug)]
pub(crate) struct JoinDecision {
    pub admission: Admission,
    pub suspend_other: Option<Option<oneshot::Sender<()>>>,
}

/// Member bookkeeping for one group.
#[derive(Debug, Default)]
pub(crate) struct Members {
    members: HashMap<u64, Option<oneshot::Sender<()>>>,
    high_water: usize,
}

impl Members {
    pub fn join(&mut self, id: u64, suspend: oneshot::Sender<()>) -> JoinDecision {
        self.members.insert(id, Some(suspend));
        let count = self.members.len();
        if count <= self.high_water {
            let admission = if self.high_water <= 1 {
                Admission::Ready
            } else {
                Admission::AwaitLock
            };
            return JoinDecision {
                admission,
                suspend_other: None,
            };
        }

        self.high_water = count;
        match count {
            1 => JoinDecision {
                admission: Admission::Ready,
                suspend_other: None,
            },
            2 => {
                let other = self
                    .members
                    .iter_mut()
                    .find(|(other, _)| **other != id)
                    .and_then(|(_, signal)| signal.take());
                JoinDecision {
                    admission: Admission::AwaitLock,
                    suspend_other: Some(other),
                }
            }
            _ => JoinDecision {
                admission: Admission::AwaitLock,
                suspend_other: None,
            },
        }
    }

    pub fn leave(&mut self, id: u64) {
        self.members.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

/// Start the coordinator task for one group.
pub(crate) fn spawn_coordinator(
    name: String,
    slot: Arc<LockSlot>,
) -> mpsc::UnboundedSender<Membership> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(coordinator_loop(name, rx, slot));
    tx
}

async fn coordinator_loop(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Membership>,
    slot: Arc<LockSlot>,
) {
    let mut members = Members::default();
    while let Some(message) = rx.recv().await {
        match message {
            Membership::Join { id, suspend, reply } => {
                let decision = members.join(id, suspend);
                debug!(
                    target: TARGET,
                    "{}: connection {} joined ({} open, max {}), {:?}",
                    name,
                    id,
                    members.len(),
                    members.high_water(),
                    decision.admission
                );
                if let Some(other) = decision.suspend_other {
                    let delivered = other.is_some_and(|signal| signal.send(()).is_ok());
                    if !delivered {
                        // the first member is gone and cannot activate the lock
                        slot.activate();
                    }
                }
                let _ = reply.send(decision.admission);
            }
            Membership::Leave { id } => {
                members.leave(id);
                debug!(
                    target: TARGET,
                    "{}: connection {} left ({} open)",
                    name,
                    id,
                    members.len()
                );
            }
        }
    }
    debug!(target: TARGET, "{}: coordinator exiting", name);
}
