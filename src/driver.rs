//! Registry of connection groups.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::config::ShellSettings;
use crate::connection::Connection;
use crate::connector::Connector;
use crate::error::ShellResult;

/// Hands out one [`Connector`] per database name.
///
/// Connections opened through the same driver and name share a group and
/// are coordinated; separate drivers know nothing of each other.
#[derive(Debug, Default)]
pub struct Driver {
    settings: ShellSettings,
    connectors: Mutex<HashMap<String, Connector>>,
}

impl Driver {
    pub fn new(settings: ShellSettings) -> Self {
        Self {
            settings,
            connectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ShellSettings {
        &self.settings
    }

    /// The connector for `name`, created on first use.
    pub fn connector(&self, name: &str) -> Connector {
        let mut connectors = self
            .connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connectors
            .entry(name.to_string())
            .or_insert_with(|| Connector::new(name, self.settings.clone()))
            .clone()
    }

    pub async fn open(&self, cancel: &CancellationToken, name: &str) -> ShellResult<Connection> {
        self.connector(name).connect(cancel).await
    }
}
