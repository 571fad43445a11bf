//! Access to the Flagsmith API.
//!
//! [`Transport`] is the seam between the SDK and the network. [`HttpTransport`] is the default
//! implementation, built on a blocking `reqwest` client; custom implementations can be supplied
//! through [`ClientConfig::transport`](crate::ClientConfig::transport).
use std::{collections::HashMap, io::BufReader, time::Duration};

use reqwest::{
    blocking::{RequestBuilder, Response},
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT},
    Url,
};
use serde::{Deserialize, Serialize};

use crate::{
    environment::Environment,
    models::{ApiFlag, FeatureResult, TraitValue, Traits},
    sse::EventReader,
    Error, Result,
};

/// Sequence of raw event payloads received over a streaming connection. Ends when the server
/// closes the connection; yields an error (and then ends) if the connection fails.
pub type EventStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Requests issued by the SDK against the Flagsmith API.
///
/// Implementations are expected to retry transient failures internally and surface the
/// remaining failures as errors for which [`Error::is_transport`] returns `true`.
pub trait Transport: Send + Sync {
    /// Fetch the environment document used for local evaluation.
    fn get_environment_document(&self) -> Result<Environment>;

    /// Remotely evaluate flags for the environment.
    fn get_environment_flags(&self) -> Result<Vec<FeatureResult>>;

    /// Remotely evaluate flags for an identity, storing `traits` on the identity.
    fn get_identity_flags(&self, identifier: &str, traits: &Traits) -> Result<Vec<FeatureResult>>;

    /// Submit per-feature evaluation counts.
    fn post_analytics(&self, batch: &HashMap<String, u64>) -> Result<()>;

    /// Open the real-time update stream for the environment identified by `api_key`.
    fn open_event_stream(&self, api_key: &str) -> Result<EventStream>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn get_environment_document(&self) -> Result<Environment> {
        (**self).get_environment_document()
    }

    fn get_environment_flags(&self) -> Result<Vec<FeatureResult>> {
        (**self).get_environment_flags()
    }

    fn get_identity_flags(&self, identifier: &str, traits: &Traits) -> Result<Vec<FeatureResult>> {
        (**self).get_identity_flags(identifier, traits)
    }

    fn post_analytics(&self, batch: &HashMap<String, u64>) -> Result<()> {
        (**self).post_analytics(batch)
    }

    fn open_event_stream(&self, api_key: &str) -> Result<EventStream> {
        (**self).open_event_stream(api_key)
    }
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub environment_key: String,
    pub api_url: String,
    pub realtime_api_url: String,
    pub custom_headers: HashMap<String, String>,
    /// Timeout for regular requests. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Number of additional attempts for requests failing with a connection error or a 5xx
    /// response.
    pub retries: u32,
    pub proxy: Option<String>,
    /// Upper bound for a single streaming connection. The stream is reopened after it elapses.
    pub stream_timeout: Duration,
}

const ENVIRONMENT_KEY_HEADER: HeaderName = HeaderName::from_static("x-environment-key");
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Default [`Transport`], talking to the Flagsmith HTTP API.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    stream_client: reqwest::blocking::Client,
    retries: u32,
    environment_url: Url,
    environment_flags_url: Url,
    identities_url: Url,
    analytics_url: Url,
    realtime_api_url: Url,
}

#[derive(Serialize)]
struct IdentityRequest<'a> {
    identifier: &'a str,
    traits: Vec<TraitRequest<'a>>,
}

#[derive(Serialize)]
struct TraitRequest<'a> {
    trait_key: &'a str,
    trait_value: &'a TraitValue,
}

#[derive(Deserialize)]
struct IdentityResponse {
    flags: Vec<ApiFlag>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<HttpTransport> {
        let api_url = parse_base_url(&config.api_url)?;
        let realtime_api_url = parse_base_url(&config.realtime_api_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ENVIRONMENT_KEY_HEADER,
            header_value(ENVIRONMENT_KEY_HEADER.as_str(), &config.environment_key)?,
        );
        for (name, value) in &config.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::Configuration(format!("invalid header name: {name}")))?;
            let value = header_value(name.as_str(), value)?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::blocking::Client::builder()
            .default_headers(headers.clone())
            .timeout(config.request_timeout);
        let mut stream_builder = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(config.stream_timeout);
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|_| Error::Configuration(format!("invalid proxy url: {proxy}")))?;
            builder = builder.proxy(proxy.clone());
            stream_builder = stream_builder.proxy(proxy);
        }

        Ok(HttpTransport {
            client: builder.build()?,
            stream_client: stream_builder.build()?,
            retries: config.retries,
            environment_url: join(&api_url, "environment-document/")?,
            environment_flags_url: join(&api_url, "flags/")?,
            identities_url: join(&api_url, "identities/")?,
            analytics_url: join(&api_url, "analytics/flags/")?,
            realtime_api_url,
        })
    }

    /// Send a request, retrying connection failures and server errors with exponential
    /// backoff. Non-success responses are turned into [`Error::UnexpectedStatus`].
    fn send(&self, request: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let retries_left = attempt < self.retries;
            match request().send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_server_error() && retries_left => {
                    log::debug!(target: "flagsmith", status = response.status().as_u16(); "retrying request after server error");
                }
                Ok(response) => {
                    log::warn!(target: "flagsmith", status = response.status().as_u16(); "received non-success response from Flagsmith API");
                    return Err(Error::UnexpectedStatus(response.status().as_u16()));
                }
                Err(err) if (err.is_connect() || err.is_timeout()) && retries_left => {
                    log::debug!(target: "flagsmith", "retrying request after error: {:?}", err);
                }
                Err(err) => return Err(err.into()),
            }

            std::thread::sleep(RETRY_BACKOFF * 2u32.pow(attempt.min(6)));
            attempt += 1;
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let response = self.send(|| self.client.get(url.clone()))?;
        let body = response.bytes()?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Transport for HttpTransport {
    fn get_environment_document(&self) -> Result<Environment> {
        log::debug!(target: "flagsmith", "fetching environment document");
        let environment: Environment = self.get_json(&self.environment_url)?;
        log::debug!(target: "flagsmith", updated_at:display = environment.updated_at; "successfully fetched environment document");
        Ok(environment)
    }

    fn get_environment_flags(&self) -> Result<Vec<FeatureResult>> {
        let flags: Vec<ApiFlag> = self.get_json(&self.environment_flags_url)?;
        Ok(flags.into_iter().map(FeatureResult::from).collect())
    }

    fn get_identity_flags(&self, identifier: &str, traits: &Traits) -> Result<Vec<FeatureResult>> {
        let body = IdentityRequest {
            identifier,
            traits: traits
                .iter()
                .map(|(trait_key, trait_value)| TraitRequest {
                    trait_key,
                    trait_value,
                })
                .collect(),
        };
        let response = self.send(|| self.client.post(self.identities_url.clone()).json(&body))?;
        let body = response.bytes()?;
        let response: IdentityResponse = serde_json::from_slice(&body)?;
        Ok(response.flags.into_iter().map(FeatureResult::from).collect())
    }

    fn post_analytics(&self, batch: &HashMap<String, u64>) -> Result<()> {
        self.send(|| self.client.post(self.analytics_url.clone()).json(batch))?;
        Ok(())
    }

    fn open_event_stream(&self, api_key: &str) -> Result<EventStream> {
        let url = join(
            &self.realtime_api_url,
            &format!("sse/environments/{api_key}/stream"),
        )?;
        log::debug!(target: "flagsmith", "opening event stream");
        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "application/json, text/event-stream")
            .send()?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status().as_u16()));
        }

        let events = EventReader::new(BufReader::new(response)).map(|event| event.map_err(Error::from));
        Ok(Box::new(events))
    }
}

/// Parse a base URL, making sure it ends with a slash so that relative paths are appended to it.
fn parse_base_url(url: &str) -> Result<Url> {
    let url = if url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{url}/")
    };
    Url::parse(&url).map_err(Error::InvalidApiUrl)
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(Error::InvalidApiUrl)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Configuration(format!("invalid value for header {name}")))
}
