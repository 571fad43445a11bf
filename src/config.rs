use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use crate::{
    analytics::AnalyticsThread,
    evaluator::{Evaluator, LocalEvaluator},
    handlers::{DefaultFlagHandler, OfflineHandler},
    poller::PollerThreadConfig,
    stream::StreamThreadConfig,
    transport::{HttpTransportConfig, Transport},
    Client, Error, Result,
};

/// Configuration for [`Client`].
///
/// Options are validated when the client is created, see [`Client::new`].
pub struct ClientConfig {
    pub(crate) environment_key: Option<String>,
    pub(crate) api_url: String,
    pub(crate) realtime_api_url: String,
    pub(crate) custom_headers: HashMap<String, String>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) retries: u32,
    pub(crate) proxy: Option<String>,
    pub(crate) enable_local_evaluation: bool,
    pub(crate) environment_refresh_interval: Duration,
    pub(crate) environment_refresh_jitter: Duration,
    pub(crate) enable_analytics: bool,
    pub(crate) analytics_flush_interval: Duration,
    pub(crate) enable_realtime_updates: bool,
    pub(crate) stream_timeout: Duration,
    pub(crate) stream_reconnect_delay: Duration,
    pub(crate) default_flag_handler: Option<Arc<dyn DefaultFlagHandler + Send + Sync>>,
    pub(crate) offline_mode: bool,
    pub(crate) offline_handler: Option<Box<dyn OfflineHandler + Send + Sync>>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) evaluator: Arc<dyn Evaluator>,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_API_URL: &'static str = "https://edge.api.flagsmith.com/api/v1/";

    /// Default base URL for real-time updates.
    pub const DEFAULT_REALTIME_API_URL: &'static str = "https://realtime.flagsmith.com/";

    /// Default interval between environment document refreshes in local evaluation mode.
    pub const DEFAULT_ENVIRONMENT_REFRESH_INTERVAL: Duration =
        PollerThreadConfig::DEFAULT_POLL_INTERVAL;

    /// Default number of retries for failed requests, on top of the first attempt.
    pub const DEFAULT_RETRIES: u32 = 3;

    /// Default upper bound for a single real-time updates connection.
    pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a default configuration using the specified environment key.
    ///
    /// ```
    /// # use flagsmith::ClientConfig;
    /// ClientConfig::from_environment_key("environment-key");
    /// ```
    pub fn from_environment_key(environment_key: impl Into<String>) -> Self {
        ClientConfig {
            environment_key: Some(environment_key.into()),
            ..ClientConfig::default()
        }
    }

    /// Create a configuration for a client that never contacts the Flagsmith API. An
    /// [`offline_handler`](ClientConfig::offline_handler) must be set.
    ///
    /// ```
    /// # use flagsmith::{ClientConfig, LocalFileHandler};
    /// # fn example() -> flagsmith::Result<()> {
    /// let mut config = ClientConfig::offline();
    /// config.offline_handler(LocalFileHandler::new("environment.json")?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn offline() -> Self {
        ClientConfig {
            offline_mode: true,
            ..ClientConfig::default()
        }
    }

    /// Override base URL for API calls. A trailing slash is added if missing.
    pub fn api_url(&mut self, api_url: impl Into<String>) -> &mut Self {
        self.api_url = api_url.into();
        self
    }

    /// Override base URL for real-time updates.
    pub fn realtime_api_url(&mut self, realtime_api_url: impl Into<String>) -> &mut Self {
        self.realtime_api_url = realtime_api_url.into();
        self
    }

    /// Add headers sent with every request.
    pub fn custom_headers<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.custom_headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set timeout for API requests. Requests wait indefinitely by default.
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set number of retries for requests failing with connection errors or server errors.
    pub fn retries(&mut self, retries: u32) -> &mut Self {
        self.retries = retries;
        self
    }

    /// Route all requests through the proxy at `proxy_url`.
    pub fn proxy(&mut self, proxy_url: impl Into<String>) -> &mut Self {
        self.proxy = Some(proxy_url.into());
        self
    }

    /// Evaluate flags locally against a periodically refreshed environment document. Requires a
    /// server-side environment key.
    pub fn enable_local_evaluation(&mut self, enable: bool) -> &mut Self {
        self.enable_local_evaluation = enable;
        self
    }

    /// Set interval between environment document refreshes.
    pub fn environment_refresh_interval(&mut self, interval: Duration) -> &mut Self {
        self.environment_refresh_interval = interval;
        self
    }

    /// Set randomized duration subtracted from the refresh interval.
    pub fn environment_refresh_jitter(&mut self, jitter: Duration) -> &mut Self {
        self.environment_refresh_jitter = jitter;
        self
    }

    /// Report flag evaluation counts to the Flagsmith API.
    pub fn enable_analytics(&mut self, enable: bool) -> &mut Self {
        self.enable_analytics = enable;
        self
    }

    /// Set interval between analytics reports.
    pub fn analytics_flush_interval(&mut self, interval: Duration) -> &mut Self {
        self.analytics_flush_interval = interval;
        self
    }

    /// Refresh the environment document when notified by the real-time updates API instead of
    /// polling. Requires local evaluation.
    pub fn enable_realtime_updates(&mut self, enable: bool) -> &mut Self {
        self.enable_realtime_updates = enable;
        self
    }

    /// Set upper bound for a single real-time updates connection.
    pub fn stream_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.stream_timeout = timeout;
        self
    }

    /// Set delay before reconnecting to the real-time updates API.
    pub fn stream_reconnect_delay(&mut self, delay: Duration) -> &mut Self {
        self.stream_reconnect_delay = delay;
        self
    }

    /// Set handler providing flags for features that cannot be resolved.
    ///
    /// ```
    /// # use flagsmith::{ClientConfig, DefaultFlag};
    /// let mut config = ClientConfig::from_environment_key("environment-key");
    /// config.default_flag_handler(|_feature_name: &str| DefaultFlag {
    ///     enabled: false,
    ///     value: "default".into(),
    /// });
    /// ```
    pub fn default_flag_handler(
        &mut self,
        handler: impl DefaultFlagHandler + Send + Sync + 'static,
    ) -> &mut Self {
        self.default_flag_handler = Some(Arc::new(handler));
        self
    }

    /// Never contact the Flagsmith API. Requires an offline handler.
    pub fn offline_mode(&mut self, offline_mode: bool) -> &mut Self {
        self.offline_mode = offline_mode;
        self
    }

    /// Set handler providing the environment document when the Flagsmith API cannot be used.
    pub fn offline_handler(
        &mut self,
        handler: impl OfflineHandler + Send + Sync + 'static,
    ) -> &mut Self {
        self.offline_handler = Some(Box::new(handler));
        self
    }

    /// Use a custom transport instead of the built-in HTTP transport.
    pub fn transport(&mut self, transport: impl Transport + 'static) -> &mut Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a custom evaluator instead of [`LocalEvaluator`].
    pub fn evaluator(&mut self, evaluator: impl Evaluator + 'static) -> &mut Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```no_run
    /// # use flagsmith::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_environment_key("environment-key")
    ///     .to_client()
    ///     .unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }

    /// Check that the options can be used together.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.offline_mode && self.offline_handler.is_none() {
            return Err(Error::Configuration(
                "offline_handler must be provided to use offline mode".into(),
            ));
        }
        if self.default_flag_handler.is_some() && self.offline_handler.is_some() {
            return Err(Error::Configuration(
                "cannot use both default_flag_handler and offline_handler".into(),
            ));
        }
        if self.enable_realtime_updates && !self.enable_local_evaluation {
            return Err(Error::Configuration(
                "can only use realtime updates when running in local evaluation mode".into(),
            ));
        }
        if self.offline_mode {
            return Ok(());
        }

        let Some(environment_key) = self.environment_key.as_deref().filter(|key| !key.is_empty())
        else {
            return Err(Error::Configuration("environment_key is required".into()));
        };
        if self.enable_local_evaluation && !environment_key.starts_with("ser.") {
            return Err(Error::Configuration(
                "local evaluation requires a server-side environment key".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn http_transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            environment_key: self.environment_key.clone().unwrap_or_default(),
            api_url: self.api_url.clone(),
            realtime_api_url: self.realtime_api_url.clone(),
            custom_headers: self.custom_headers.clone(),
            request_timeout: self.request_timeout,
            retries: self.retries,
            proxy: self.proxy.clone(),
            stream_timeout: self.stream_timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            environment_key: None,
            api_url: ClientConfig::DEFAULT_API_URL.to_owned(),
            realtime_api_url: ClientConfig::DEFAULT_REALTIME_API_URL.to_owned(),
            custom_headers: HashMap::new(),
            request_timeout: None,
            retries: ClientConfig::DEFAULT_RETRIES,
            proxy: None,
            enable_local_evaluation: false,
            environment_refresh_interval: ClientConfig::DEFAULT_ENVIRONMENT_REFRESH_INTERVAL,
            environment_refresh_jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
            enable_analytics: false,
            analytics_flush_interval: AnalyticsThread::DEFAULT_FLUSH_INTERVAL,
            enable_realtime_updates: false,
            stream_timeout: ClientConfig::DEFAULT_STREAM_TIMEOUT,
            stream_reconnect_delay: StreamThreadConfig::DEFAULT_RECONNECT_DELAY,
            default_flag_handler: None,
            offline_mode: false,
            offline_handler: None,
            transport: None,
            evaluator: Arc::new(LocalEvaluator),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("realtime_api_url", &self.realtime_api_url)
            .field("enable_local_evaluation", &self.enable_local_evaluation)
            .field("enable_analytics", &self.enable_analytics)
            .field("enable_realtime_updates", &self.enable_realtime_updates)
            .field("offline_mode", &self.offline_mode)
            .finish_non_exhaustive()
    }
}
