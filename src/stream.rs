//! Real-time updates: a background thread that listens to the environment event stream and
//! refreshes the environment document when the server reports a newer version.
use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError, TryRecvError},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{refresher::EnvironmentUpdater, transport::Transport, Error, Result};

/// Payload of a real-time update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEvent {
    /// Time the environment was last updated on the server.
    pub updated_at: DateTime<Utc>,
}

impl StreamEvent {
    /// Parse an event payload of the form `{"updated_at": <epoch seconds>}`. Fractional seconds
    /// are kept with microsecond precision.
    pub fn parse(data: &str) -> Result<StreamEvent> {
        let payload: serde_json::Value = serde_json::from_str(data).map_err(|err| {
            Error::InvalidStreamEvent(format!("unable to get valid json from event data: {err}"))
        })?;

        payload
            .get("updated_at")
            .and_then(serde_json::Value::as_f64)
            .and_then(from_epoch_seconds)
            .map(|updated_at| StreamEvent { updated_at })
            .ok_or_else(|| {
                Error::InvalidStreamEvent("unable to get valid timestamp from event data".into())
            })
    }
}

fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
}

/// Decides whether a stream event requires a refresh and performs it.
pub(crate) struct StreamEventHandler {
    updater: Arc<EnvironmentUpdater>,
}

impl StreamEventHandler {
    pub fn new(updater: Arc<EnvironmentUpdater>) -> Self {
        StreamEventHandler { updater }
    }

    /// Returns `true` if the event triggered a refresh.
    ///
    /// Only events strictly newer than the active environment trigger a refresh.
    pub fn handle_event(&self, data: &str) -> Result<bool> {
        let event = StreamEvent::parse(data)?;

        if let Some(environment) = self.updater.store().get_environment() {
            if event.updated_at <= environment.updated_at {
                log::trace!(target: "flagsmith",
                            event_updated_at:display = event.updated_at,
                            environment_updated_at:display = environment.updated_at;
                            "environment is up to date");
                return Ok(false);
            }
        }

        log::debug!(target: "flagsmith", event_updated_at:display = event.updated_at; "environment changed, refreshing");
        self.updater.update()?;
        Ok(true)
    }
}

/// Configuration for [`StreamThread`].
#[derive(Debug, Clone)]
pub(crate) struct StreamThreadConfig {
    /// API key of the environment whose stream is followed.
    pub api_key: String,
    /// Delay before reopening a failed or closed connection.
    pub reconnect_delay: Duration,
}

impl StreamThreadConfig {
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
}

/// A thread following the real-time update stream.
///
/// Connection failures and malformed events are logged and never stop the thread. Stop commands
/// are observed after each event and between connections; a blocked read is bounded by the
/// transport's stream timeout.
pub(crate) struct StreamThread {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl StreamThread {
    pub fn start(
        transport: Arc<dyn Transport>,
        updater: Arc<EnvironmentUpdater>,
        config: StreamThreadConfig,
    ) -> std::io::Result<StreamThread> {
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);
        let handler = StreamEventHandler::new(updater);

        let join_handle = std::thread::Builder::new()
            .name("flagsmith-stream".to_owned())
            .spawn(move || loop {
                if stop_requested(&stop_receiver) {
                    return;
                }

                match transport.open_event_stream(&config.api_key) {
                    Ok(events) => {
                        for event in events {
                            match event {
                                Ok(data) => {
                                    if let Err(err) = handler.handle_event(&data) {
                                        log::error!(target: "flagsmith", "error handling event stream: {}", err);
                                    }
                                }
                                Err(err) if err.is_timeout() => {
                                    log::debug!(target: "flagsmith", "event stream timed out, reconnecting");
                                }
                                Err(err) => {
                                    log::warn!(target: "flagsmith", "error reading event stream: {}", err);
                                }
                            }
                            if stop_requested(&stop_receiver) {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!(target: "flagsmith", "error connecting to event stream: {}", err);
                    }
                }

                match stop_receiver.recv_timeout(config.reconnect_delay) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Reconnect.
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!(target: "flagsmith", "stream thread received stop command");
                        return;
                    }
                }
            })?;

        Ok(StreamThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the stream thread without waiting for it to exit.
    pub fn stop(&self) {
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the stream thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle.join().map_err(|_| Error::ThreadPanicked)
    }
}

fn stop_requested(stop_receiver: &Receiver<()>) -> bool {
    match stop_receiver.try_recv() {
        Err(TryRecvError::Empty) => false,
        Ok(()) | Err(TryRecvError::Disconnected) => {
            log::debug!(target: "flagsmith", "stream thread received stop command");
            true
        }
    }
}
