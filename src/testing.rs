//! Test doubles shared by unit tests.
use std::{
    cell::Cell,
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use chrono::{DateTime, Utc};

use crate::{
    environment::{Environment, Feature, FeatureState},
    models::{FeatureResult, Traits},
    transport::{EventStream, Transport},
    Error, Result,
};

pub(crate) fn environment_at(updated_at: DateTime<Utc>) -> Environment {
    Environment {
        api_key: "api-key".to_owned(),
        name: "test".to_owned(),
        updated_at,
        feature_states: vec![FeatureState {
            feature: Feature {
                id: 1,
                name: "version".to_owned(),
            },
            enabled: true,
            feature_state_value: updated_at.timestamp().into(),
            django_id: Some(1),
            featurestate_uuid: None,
            multivariate_feature_state_values: vec![],
        }],
        project: Default::default(),
        identity_overrides: vec![],
    }
}

thread_local! {
    static ERRORS_LOGGED: Cell<usize> = const { Cell::new(0) };
}

/// Logger counting `flagsmith` error records per thread, so that tests running in parallel
/// don't see each other's records.
struct ErrorCounter;

impl log::Log for ErrorCounter {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() == log::Level::Error && metadata.target() == "flagsmith"
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            ERRORS_LOGGED.with(|count| count.set(count.get() + 1));
        }
    }

    fn flush(&self) {}
}

static ERROR_COUNTER: ErrorCounter = ErrorCounter;

/// Run `f` and return the number of errors it logged on the current thread.
pub(crate) fn count_logged_errors(f: impl FnOnce()) -> usize {
    if log::set_logger(&ERROR_COUNTER).is_ok() {
        log::set_max_level(log::LevelFilter::Error);
    }
    ERRORS_LOGGED.with(|count| count.set(0));
    f();
    ERRORS_LOGGED.with(Cell::get)
}

pub(crate) fn counts(items: &[(&str, u64)]) -> HashMap<String, u64> {
    items
        .iter()
        .map(|(name, count)| ((*name).to_owned(), *count))
        .collect()
}

/// In-memory [`Transport`] that serves scripted responses and records requests.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    environment: Mutex<Option<Environment>>,
    environment_calls: AtomicUsize,
    flags: Mutex<Option<Vec<FeatureResult>>>,
    flags_calls: AtomicUsize,
    analytics: Mutex<Vec<HashMap<String, u64>>>,
    analytics_calls: AtomicUsize,
    fail_analytics: AtomicBool,
    streams: Mutex<VecDeque<EventStream>>,
    stream_calls: AtomicUsize,
}

impl RecordingTransport {
    /// Serve `environment` from the environment document endpoint. Until called, the endpoint
    /// fails with a 500.
    pub fn set_environment(&self, environment: Environment) {
        *self.environment.lock().unwrap() = Some(environment);
    }

    pub fn clear_environment(&self) {
        *self.environment.lock().unwrap() = None;
    }

    /// Serve `flags` from the flags endpoints. Until called, the endpoints fail with a 500.
    pub fn set_flags(&self, flags: Vec<FeatureResult>) {
        *self.flags.lock().unwrap() = Some(flags);
    }

    pub fn fail_analytics(&self, fail: bool) {
        self.fail_analytics.store(fail, Ordering::SeqCst);
    }

    /// Queue a stream to be returned by the next `open_event_stream` call. Once the queue is
    /// empty, opening a stream fails with a 503.
    pub fn push_stream(&self, stream: EventStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn environment_calls(&self) -> usize {
        self.environment_calls.load(Ordering::SeqCst)
    }

    pub fn flags_calls(&self) -> usize {
        self.flags_calls.load(Ordering::SeqCst)
    }

    pub fn analytics_calls(&self) -> usize {
        self.analytics_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Successfully delivered analytics batches.
    pub fn analytics_batches(&self) -> Vec<HashMap<String, u64>> {
        self.analytics.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn get_environment_document(&self) -> Result<Environment> {
        self.environment_calls.fetch_add(1, Ordering::SeqCst);
        self.environment
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::UnexpectedStatus(500))
    }

    fn get_environment_flags(&self) -> Result<Vec<FeatureResult>> {
        self.flags_calls.fetch_add(1, Ordering::SeqCst);
        self.flags
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::UnexpectedStatus(500))
    }

    fn get_identity_flags(&self, _identifier: &str, _traits: &Traits) -> Result<Vec<FeatureResult>> {
        self.get_environment_flags()
    }

    fn post_analytics(&self, batch: &HashMap<String, u64>) -> Result<()> {
        self.analytics_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_analytics.load(Ordering::SeqCst) {
            return Err(Error::UnexpectedStatus(502));
        }
        self.analytics.lock().unwrap().push(batch.clone());
        Ok(())
    }

    fn open_event_stream(&self, _api_key: &str) -> Result<EventStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(Error::UnexpectedStatus(503))
    }
}
