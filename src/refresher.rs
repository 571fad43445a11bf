//! Keeps the local environment document up to date.
use std::sync::{Arc, Mutex};

use crate::{
    environment_store::EnvironmentStore, poller::PollerThread, stream::StreamThread,
    transport::Transport, Result,
};

/// Fetches the environment document and stores it.
///
/// Updates are serialized: at most one fetch is in flight at any time, whether it was started by
/// a background refresher or by [`Client::update_environment`](crate::Client::update_environment).
pub(crate) struct EnvironmentUpdater {
    transport: Arc<dyn Transport>,
    store: Arc<EnvironmentStore>,
    in_flight: Mutex<()>,
}

impl EnvironmentUpdater {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<EnvironmentStore>) -> Self {
        EnvironmentUpdater {
            transport,
            store,
            in_flight: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<EnvironmentStore> {
        &self.store
    }

    /// Fetch the environment document and make it active. On error the active document is
    /// kept.
    pub fn update(&self) -> Result<()> {
        let _guard = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let environment = self.transport.get_environment_document()?;
        self.store.set_environment(environment);
        Ok(())
    }
}

/// Background refresh strategy. Polling and streaming are mutually exclusive.
pub(crate) enum Refresher {
    Poll(PollerThread),
    Stream(StreamThread),
}

impl Refresher {
    pub fn stop(&self) {
        match self {
            Refresher::Poll(poller) => poller.stop(),
            Refresher::Stream(stream) => stream.stop(),
        }
    }

    pub fn shutdown(self) -> Result<()> {
        match self {
            Refresher::Poll(poller) => poller.shutdown(),
            Refresher::Stream(stream) => stream.shutdown(),
        }
    }
}
