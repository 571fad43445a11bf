use std::sync::{Arc, Mutex};

use crate::{
    analytics::{AnalyticsProcessor, AnalyticsThread},
    environment::Environment,
    environment_store::EnvironmentStore,
    models::{Flags, Segment, Traits},
    poller::{PollerThread, PollerThreadConfig},
    refresher::{EnvironmentUpdater, Refresher},
    resolver::FlagResolver,
    stream::{StreamThread, StreamThreadConfig},
    transport::{HttpTransport, Transport},
    ClientConfig, Error, Result,
};

/// A client for the Flagsmith API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// Depending on the configuration, the client either requests flags from the API on every call
/// (remote evaluation) or evaluates them against a locally held environment document that is
/// kept up to date by a background thread (local evaluation).
///
/// Background threads are stopped when the client is dropped. Use [`Client::shutdown`] to also
/// wait for them to exit and for the final analytics report to be sent.
///
/// # Examples
/// ```no_run
/// # use flagsmith::{Client, ClientConfig};
/// # fn example() -> flagsmith::Result<()> {
/// let client = Client::new(ClientConfig::from_environment_key("environment-key"))?;
/// let flags = client.get_environment_flags()?;
/// if flags.is_feature_enabled("new-checkout")? {
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    /// Whether flags are evaluated against the environment document when one is available.
    use_environment: bool,
    store: Arc<EnvironmentStore>,
    updater: Option<Arc<EnvironmentUpdater>>,
    resolver: FlagResolver,
    refresher: Mutex<Option<Refresher>>,
    analytics_thread: Mutex<Option<AnalyticsThread>>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// In local evaluation mode, the environment document is fetched before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid option combinations, before any request is
    /// made. In local evaluation mode, returns the error of the initial environment document
    /// request.
    pub fn new(config: ClientConfig) -> Result<Client> {
        config.validate()?;

        let store = Arc::new(EnvironmentStore::new());
        if let Some(offline_handler) = &config.offline_handler {
            store.set_environment(offline_handler.get_environment());
        }

        let transport: Option<Arc<dyn Transport>> = match (&config.transport, config.offline_mode)
        {
            (_, true) => None,
            (Some(transport), false) => Some(transport.clone()),
            (None, false) => Some(Arc::new(HttpTransport::new(
                config.http_transport_config(),
            )?)),
        };

        let updater = transport
            .as_ref()
            .map(|transport| Arc::new(EnvironmentUpdater::new(transport.clone(), store.clone())));

        let refresher = match &updater {
            Some(updater) if config.enable_local_evaluation => {
                // Make sure the environment is present before the client is handed out.
                updater.update()?;
                Some(Client::start_refresher(&config, transport.as_ref(), updater)?)
            }
            _ => None,
        };

        let analytics = match &transport {
            Some(transport) if config.enable_analytics => {
                Some(Arc::new(AnalyticsProcessor::new(transport.clone())))
            }
            _ => None,
        };
        let analytics_thread = analytics
            .as_ref()
            .map(|analytics| {
                AnalyticsThread::start(analytics.clone(), config.analytics_flush_interval)
            })
            .transpose()?;

        let resolver = FlagResolver::new(
            store.clone(),
            config.evaluator.clone(),
            transport,
            analytics,
            config.default_flag_handler.clone(),
            config.offline_handler.is_some(),
        );

        log::debug!(target: "flagsmith",
                    local_evaluation = config.enable_local_evaluation,
                    offline_mode = config.offline_mode,
                    analytics = config.enable_analytics;
                    "created Flagsmith client");

        Ok(Client {
            use_environment: config.enable_local_evaluation || config.offline_mode,
            store,
            updater,
            resolver,
            refresher: Mutex::new(refresher),
            analytics_thread: Mutex::new(analytics_thread),
        })
    }

    fn start_refresher(
        config: &ClientConfig,
        transport: Option<&Arc<dyn Transport>>,
        updater: &Arc<EnvironmentUpdater>,
    ) -> Result<Refresher> {
        match transport {
            Some(transport) if config.enable_realtime_updates => {
                let api_key = updater
                    .store()
                    .get_environment()
                    .map(|environment| environment.api_key.clone())
                    .ok_or(Error::EnvironmentNotLoaded)?;

                log::debug!(target: "flagsmith", "starting stream thread");
                let thread = StreamThread::start(
                    transport.clone(),
                    updater.clone(),
                    StreamThreadConfig {
                        api_key,
                        reconnect_delay: config.stream_reconnect_delay,
                    },
                )?;
                Ok(Refresher::Stream(thread))
            }
            _ => {
                log::debug!(target: "flagsmith", "starting poller thread");
                let thread = PollerThread::start(
                    updater.clone(),
                    PollerThreadConfig {
                        interval: config.environment_refresh_interval,
                        jitter: config.environment_refresh_jitter,
                    },
                )?;
                Ok(Refresher::Poll(thread))
            }
        }
    }

    /// Get all flags for the environment.
    pub fn get_environment_flags(&self) -> Result<Flags> {
        if self.uses_environment() {
            return self.resolver.environment_flags();
        }
        self.resolver.remote_environment_flags()
    }

    /// Get all flags for the identity. In remote evaluation mode, `traits` are stored on the
    /// identity by the Flagsmith API.
    pub fn get_identity_flags(&self, identifier: &str, traits: &Traits) -> Result<Flags> {
        if self.uses_environment() {
            return self.resolver.identity_flags(identifier, traits);
        }
        self.resolver.remote_identity_flags(identifier, traits)
    }

    /// Get the segments the identity belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvironmentNotLoaded`] unless an environment document is available,
    /// i.e. unless the client runs in local evaluation mode or has an offline handler.
    pub fn get_identity_segments(&self, identifier: &str, traits: &Traits) -> Result<Vec<Segment>> {
        self.resolver.identity_segments(identifier, traits)
    }

    /// Fetch the environment document now. Concurrent refreshes are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] in offline mode.
    pub fn update_environment(&self) -> Result<()> {
        let Some(updater) = &self.updater else {
            return Err(Error::Configuration(
                "environment updates are not available in offline mode".into(),
            ));
        };
        updater.update()
    }

    /// The currently active environment document, if any.
    pub fn environment(&self) -> Option<Arc<Environment>> {
        self.store.get_environment()
    }

    /// Stop background threads and block until they exit. Pending analytics are sent before
    /// returning.
    ///
    /// Calling `shutdown` more than once is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        let refresher = take(&self.refresher);
        let analytics_thread = take(&self.analytics_thread);

        // Signal both threads first so they wind down concurrently.
        if let Some(refresher) = &refresher {
            refresher.stop();
        }
        if let Some(analytics_thread) = &analytics_thread {
            analytics_thread.stop();
        }

        let refresher_result = refresher.map_or(Ok(()), Refresher::shutdown);
        let analytics_result = analytics_thread.map_or(Ok(()), AnalyticsThread::shutdown);
        log::debug!(target: "flagsmith", "Flagsmith client shut down");

        refresher_result.and(analytics_result)
    }

    fn uses_environment(&self) -> bool {
        self.use_environment && self.store.get_environment().is_some()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(refresher) = lock(&self.refresher).as_ref() {
            refresher.stop();
        }
        if let Some(analytics_thread) = lock(&self.analytics_thread).as_ref() {
            analytics_thread.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    lock(slot).take()
}
