//! Connection groups keyed by database name.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::ShellSettings;
use crate::connection::Connection;
use crate::coordinator::{Admission, LockSlot, Membership, spawn_coordinator};
use crate::error::{ShellError, ShellResult};
use crate::shell::process;

struct ConnectorShared {
    name: String,
    settings: ShellSettings,
    coordinator: mpsc::UnboundedSender<Membership>,
    slot: Arc<LockSlot>,
    next_id: AtomicU64,
}

/// Opens connections to one database and coordinates them.
///
/// Cheap to clone; clones share the group. Must be created inside a Tokio
/// runtime.
#[derive(Clone)]
pub struct Connector {
    shared: Arc<ConnectorShared>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.shared.name)
            .field("lock_active", &self.lock_active())
            .finish()
    }
}

impl Connector {
    pub fn new(name: impl Into<String>, settings: ShellSettings) -> Self {
        let name = name.into();
        let slot = Arc::new(LockSlot::new());
        let coordinator = spawn_coordinator(name.clone(), slot.clone());
        Self {
            shared: Arc::new(ConnectorShared {
                name,
                settings,
                coordinator,
                slot,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn settings(&self) -> &ShellSettings {
        &self.shared.settings
    }

    /// Whether connections in this group serialize through the shared lock.
    pub fn lock_active(&self) -> bool {
        self.shared.slot.is_active()
    }

    /// Whether both connectors belong to the same group.
    pub fn same_group(&self, other: &Connector) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn slot(&self) -> Arc<LockSlot> {
        self.shared.slot.clone()
    }

    pub(crate) fn leave(&self, id: u64) {
        let _ = self.shared.coordinator.send(Membership::Leave { id });
    }

    /// Start a shell and join the group.
    ///
    /// When the group already has (or once had) another member, this waits
    /// until the shared lock is active.
    pub async fn connect(&self, cancel: &CancellationToken) -> ShellResult<Connection> {
        if cancel.is_cancelled() {
            return Err(ShellError::Cancelled);
        }
        self.shared.settings.validate()?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let shell = process::spawn(&self.shared.settings, &self.shared.name)?;
        let (connection, suspend) = Connection::start(self.clone(), id, shell);

        let (reply, admission) = oneshot::channel();
        self.shared
            .coordinator
            .send(Membership::Join { id, suspend, reply })
            .map_err(|_| ShellError::internal("lock coordinator is gone"))?;

        let admission = tokio::select! {
            admission = admission => {
                admission.map_err(|_| ShellError::internal("lock coordinator is gone"))?
            }
            _ = cancel.cancelled() => {
                let _ = connection.close().await;
                return Err(ShellError::Cancelled);
            }
        };

        if admission == Admission::AwaitLock {
            debug!(
                target: "shelldb::coordinator",
                "{}: connection {} waiting for the shared lock",
                self.shared.name,
                id
            );
            tokio::select! {
                biased;
                _ = self.shared.slot.wait_active() => {}
                _ = cancel.cancelled() => {
                    let _ = connection.close().await;
                    return Err(ShellError::Cancelled);
                }
                _ = connection.lifetime().cancelled() => {
                    let err = connection.close().await.err();
                    return Err(err.unwrap_or(ShellError::ConnectionLost));
                }
            }
        }
        Ok(connection)
    }
}
