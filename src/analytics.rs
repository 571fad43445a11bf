//! Flag analytics: counts how often each feature is evaluated and periodically reports the counts
//! to the Flagsmith API.
use std::{
    collections::HashMap,
    sync::{mpsc::RecvTimeoutError, Arc, Mutex},
    time::Duration,
};

use crate::{transport::Transport, Error, Result};

/// Aggregates per-feature evaluation counts.
///
/// [`AnalyticsProcessor::track_feature`] never performs network I/O. Counts are shipped by
/// [`AnalyticsProcessor::flush`], normally called from an [`AnalyticsThread`].
pub struct AnalyticsProcessor {
    transport: Arc<dyn Transport>,
    counters: Mutex<HashMap<String, u64>>,
}

impl AnalyticsProcessor {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        AnalyticsProcessor {
            transport,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Record one evaluation of `feature_name`.
    pub fn track_feature(&self, feature_name: &str) {
        let mut counters = self.lock_counters();
        match counters.get_mut(feature_name) {
            Some(count) => *count += 1,
            None => {
                counters.insert(feature_name.to_owned(), 1);
            }
        }
    }

    /// Send all collected counts and reset them.
    ///
    /// Delivery is at-most-once: the counters are taken before sending, and a batch that fails
    /// to send is dropped rather than restored. Does nothing if there is nothing to send.
    pub fn flush(&self) {
        let batch = std::mem::take(&mut *self.lock_counters());
        if batch.is_empty() {
            return;
        }

        log::debug!(target: "flagsmith", features = batch.len(); "sending analytics data");
        if let Err(err) = self.transport.post_analytics(&batch) {
            log::error!(target: "flagsmith", "failed to send analytics data: {}", err);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> HashMap<String, u64> {
        self.lock_counters().clone()
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        // A panic while holding the lock cannot leave the map half-updated, so keep counting.
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Background thread that flushes an [`AnalyticsProcessor`] on a fixed interval.
pub(crate) struct AnalyticsThread {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl AnalyticsThread {
    /// Default flush interval.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

    /// Start flushing `processor` every `interval`. A final flush is performed when the thread
    /// is stopped.
    pub fn start(
        processor: Arc<AnalyticsProcessor>,
        interval: Duration,
    ) -> std::io::Result<AnalyticsThread> {
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("flagsmith-analytics".to_owned())
            .spawn(move || loop {
                match stop_receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => processor.flush(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!(target: "flagsmith", "analytics thread received stop command");
                        processor.flush();
                        return;
                    }
                }
            })?;

        Ok(AnalyticsThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the thread without waiting for it to exit.
    pub fn stop(&self) {
        // Full buffer means a stop command is already pending, closed channel means the thread
        // has exited. Both are fine.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and block until the final flush completes.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle.join().map_err(|_| Error::ThreadPanicked)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{AnalyticsProcessor, AnalyticsThread};
    use crate::{
        testing::{count_logged_errors, counts, RecordingTransport},
        Transport,
    };

    fn processor(transport: &Arc<RecordingTransport>) -> Arc<AnalyticsProcessor> {
        Arc::new(AnalyticsProcessor::new(
            transport.clone() as Arc<dyn Transport>
        ))
    }

    #[test]
    fn flush_sends_counts_and_clears() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = processor(&transport);

        for _ in 0..5 {
            analytics.track_feature("f");
        }
        analytics.track_feature("g");
        analytics.flush();

        assert_eq!(
            transport.analytics_batches(),
            vec![counts(&[("f", 5), ("g", 1)])]
        );
        assert!(analytics.pending().is_empty());
    }

    #[test]
    fn empty_flush_makes_no_call() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = processor(&transport);

        analytics.flush();

        assert_eq!(transport.analytics_calls(), 0);
    }

    #[test]
    fn failed_flush_drops_batch() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_analytics(true);
        let analytics = processor(&transport);

        analytics.track_feature("f");
        analytics.flush();

        assert_eq!(transport.analytics_calls(), 1);
        assert!(analytics.pending().is_empty());

        // The dropped batch is not resent with the next one.
        transport.fail_analytics(false);
        analytics.track_feature("f");
        analytics.flush();
        assert_eq!(
            transport.analytics_batches(),
            vec![counts(&[("f", 1)])]
        );
    }

    #[test]
    fn failed_flush_logs_one_error() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_analytics(true);
        let analytics = processor(&transport);
        analytics.track_feature("f");
        analytics.track_feature("f");

        let errors = count_logged_errors(|| analytics.flush());

        assert_eq!(errors, 1);
        assert_eq!(transport.analytics_calls(), 1);
        assert!(analytics.pending().is_empty());
    }

    #[test]
    fn concurrent_tracking_loses_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = processor(&transport);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let analytics = analytics.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        analytics.track_feature("f");
                        if i % 100 == 0 {
                            analytics.flush();
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        analytics.flush();

        let total: u64 = transport
            .analytics_batches()
            .iter()
            .map(|batch| batch.get("f").copied().unwrap_or(0))
            .sum();
        assert_eq!(total, 4000);
    }

    #[test]
    fn thread_flushes_on_shutdown() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = processor(&transport);
        let thread = AnalyticsThread::start(analytics.clone(), Duration::from_secs(3600)).unwrap();

        analytics.track_feature("f");
        thread.shutdown().unwrap();

        assert_eq!(
            transport.analytics_batches(),
            vec![counts(&[("f", 1)])]
        );
    }

    #[test]
    fn thread_flushes_periodically() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = processor(&transport);
        let thread = AnalyticsThread::start(analytics.clone(), Duration::from_millis(10)).unwrap();

        analytics.track_feature("f");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.analytics_calls() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(transport.analytics_calls(), 1);
        thread.shutdown().unwrap();
    }
}
