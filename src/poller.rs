//! A background poller thread that periodically requests the environment document from the server
//! and stores it in the environment store.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{refresher::EnvironmentUpdater, Error, Result};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub(crate) struct PollerThreadConfig {
    /// Interval to wait between requests for the environment document.
    pub interval: Duration,
    /// Randomized duration subtracted from `interval`. This helps to avoid multiple server
    /// instances synchronizing and producing spiky network load.
    pub jitter: Duration,
}

impl PollerThreadConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_POLL_JITTER: Duration = Duration::ZERO;
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// An environment poller thread.
///
/// The thread does not fetch on start: the client performs the first fetch synchronously, so
/// the thread waits for one interval before its first request.
pub(crate) struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl PollerThread {
    pub fn start(
        updater: Arc<EnvironmentUpdater>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync`. Buffer size of 1 is enough
        // as we only ever send a stop command and `try_send()` it.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("flagsmith-poller".to_owned())
            .spawn(move || loop {
                let timeout = jitter(config.interval, config.jitter);
                match stop_receiver.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Timed out. Fetch a new environment document.
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!(target: "flagsmith", "poller thread received stop command");
                        return;
                    }
                }

                log::debug!(target: "flagsmith", "polling for new environment document");
                if let Err(err) = updater.update() {
                    // Keep serving the last known environment, we'll try again later.
                    log::warn!(target: "flagsmith", "error while fetching new environment document: {}", err);
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop. A fetch that is in flight
    /// is allowed to complete.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the buffer is full
        // (another stop command is pending). The thread stops in both cases.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::ThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}


#[cfg(test)]
mod jitter_tests {
    use std::time::Duration;

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let jitter = Duration::from_secs(30);

        let result = super::jitter(interval, jitter);

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let interval = Duration::from_secs(30);

        let result = super::jitter(interval, Duration::ZERO);

        assert_eq!(result, Duration::from_secs(30));
    }
}
