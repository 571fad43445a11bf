//! Resolution of [`Flags`] from the local environment document or from the Flagsmith API.
use std::sync::Arc;

use crate::{
    analytics::AnalyticsProcessor,
    environment::Environment,
    environment_store::EnvironmentStore,
    evaluator::Evaluator,
    handlers::DefaultFlagHandler,
    models::{FeatureResult, Flags, IdentityContext, Segment, Traits},
    transport::Transport,
    Error, Result,
};

pub(crate) struct FlagResolver {
    store: Arc<EnvironmentStore>,
    evaluator: Arc<dyn Evaluator>,
    /// `None` in offline mode.
    transport: Option<Arc<dyn Transport>>,
    analytics: Option<Arc<AnalyticsProcessor>>,
    default_flag_handler: Option<Arc<dyn DefaultFlagHandler + Send + Sync>>,
    /// Whether the stored environment came from an offline handler and may be used when the
    /// API is unreachable.
    offline_fallback: bool,
}

impl FlagResolver {
    pub fn new(
        store: Arc<EnvironmentStore>,
        evaluator: Arc<dyn Evaluator>,
        transport: Option<Arc<dyn Transport>>,
        analytics: Option<Arc<AnalyticsProcessor>>,
        default_flag_handler: Option<Arc<dyn DefaultFlagHandler + Send + Sync>>,
        offline_fallback: bool,
    ) -> Self {
        FlagResolver {
            store,
            evaluator,
            transport,
            analytics,
            default_flag_handler,
            offline_fallback,
        }
    }

    /// Evaluate environment flags against the stored environment document.
    pub fn environment_flags(&self) -> Result<Flags> {
        let environment = self.environment()?;
        Ok(self.evaluate(&environment, None))
    }

    /// Evaluate flags for an identity against the stored environment document.
    pub fn identity_flags(&self, identifier: &str, traits: &Traits) -> Result<Flags> {
        let environment = self.environment()?;
        let identity = IdentityContext::new(identifier, traits.clone());
        Ok(self.evaluate(&environment, Some(&identity)))
    }

    /// Segments of the stored environment document that the identity belongs to.
    pub fn identity_segments(&self, identifier: &str, traits: &Traits) -> Result<Vec<Segment>> {
        let environment = self.environment()?;
        let identity = IdentityContext::new(identifier, traits.clone());
        let segments = self.evaluator.identity_segments(&environment, &identity);

        log::trace!(target: "flagsmith",
                    identifier,
                    traits:serde = traits,
                    segments = segments.len();
                    "evaluated identity segments");

        Ok(segments)
    }

    /// Request environment flags from the API, falling back if the request fails.
    pub fn remote_environment_flags(&self) -> Result<Flags> {
        let transport = self.transport()?;
        match transport.get_environment_flags() {
            Ok(results) => Ok(self.flags(results)),
            Err(err) => self.fallback(err, None),
        }
    }

    /// Request identity flags from the API, falling back if the request fails.
    pub fn remote_identity_flags(&self, identifier: &str, traits: &Traits) -> Result<Flags> {
        let transport = self.transport()?;
        match transport.get_identity_flags(identifier, traits) {
            Ok(results) => Ok(self.flags(results)),
            Err(err) => {
                let identity = IdentityContext::new(identifier, traits.clone());
                self.fallback(err, Some(&identity))
            }
        }
    }

    /// Recover from a failed API request: evaluate the offline environment if there is one,
    /// else answer from the default flag handler only. Any other failure is returned as is.
    fn fallback(&self, err: Error, identity: Option<&IdentityContext>) -> Result<Flags> {
        if !err.is_transport() {
            return Err(err);
        }

        if self.offline_fallback {
            if let Some(environment) = self.store.get_environment() {
                log::warn!(target: "flagsmith", "Flagsmith API request failed, using offline environment: {}", err);
                return Ok(self.evaluate(&environment, identity));
            }
        }

        if let Some(handler) = &self.default_flag_handler {
            log::warn!(target: "flagsmith", "Flagsmith API request failed, using default flag handler: {}", err);
            return Ok(Flags::from_default_handler(handler.clone()));
        }

        Err(err)
    }

    fn evaluate(&self, environment: &Environment, identity: Option<&IdentityContext>) -> Flags {
        let results = self.evaluator.evaluate(environment, identity);

        log::trace!(target: "flagsmith",
                    identifier:? = identity.map(|identity| identity.identifier.as_str()),
                    flags = results.len(),
                    updated_at:display = environment.updated_at;
                    "evaluated flags");

        self.flags(results)
    }

    fn flags(&self, results: Vec<FeatureResult>) -> Flags {
        Flags::new(
            results,
            self.default_flag_handler.clone(),
            self.analytics.clone(),
        )
    }

    fn environment(&self) -> Result<Arc<Environment>> {
        self.store
            .get_environment()
            .ok_or(Error::EnvironmentNotLoaded)
    }

    fn transport(&self) -> Result<&Arc<dyn Transport>> {
        self.transport.as_ref().ok_or(Error::EnvironmentNotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::FlagResolver;
    use crate::{
        analytics::AnalyticsProcessor,
        environment_store::EnvironmentStore,
        evaluator::LocalEvaluator,
        handlers::DefaultFlagHandler,
        models::{DefaultFlag, FeatureResult, FeatureValue, Traits},
        testing::{environment_at, RecordingTransport},
        Error, Transport,
    };

    fn default_handler() -> Arc<dyn DefaultFlagHandler + Send + Sync> {
        Arc::new(|_: &str| DefaultFlag {
            enabled: false,
            value: "default".into(),
        })
    }

    fn resolver(
        transport: &Arc<RecordingTransport>,
        store: &Arc<EnvironmentStore>,
        default_flag_handler: Option<Arc<dyn DefaultFlagHandler + Send + Sync>>,
        offline_fallback: bool,
    ) -> FlagResolver {
        FlagResolver::new(
            store.clone(),
            Arc::new(LocalEvaluator),
            Some(transport.clone() as Arc<dyn Transport>),
            Some(Arc::new(AnalyticsProcessor::new(
                transport.clone() as Arc<dyn Transport>
            ))),
            default_flag_handler,
            offline_fallback,
        )
    }

    #[test]
    fn local_flags_require_environment() {
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(EnvironmentStore::new());
        let resolver = resolver(&transport, &store, None, false);

        assert!(matches!(
            resolver.environment_flags(),
            Err(Error::EnvironmentNotLoaded)
        ));
        assert!(matches!(
            resolver.identity_segments("id", &Traits::new()),
            Err(Error::EnvironmentNotLoaded)
        ));
    }

    #[test]
    fn local_flags_evaluate_stored_environment() {
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(EnvironmentStore::new());
        let updated_at = Utc::now();
        store.set_environment(environment_at(updated_at));
        let resolver = resolver(&transport, &store, None, false);

        let flags = resolver.identity_flags("id", &Traits::new()).unwrap();

        assert_eq!(
            flags.get_feature_value("version").unwrap(),
            FeatureValue::Integer(updated_at.timestamp())
        );
        assert_eq!(transport.flags_calls(), 0);
    }

    #[test]
    fn remote_failure_uses_offline_environment() {
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(EnvironmentStore::new());
        store.set_environment(environment_at(Utc::now()));
        let resolver = resolver(&transport, &store, None, true);

        let flags = resolver.remote_environment_flags().unwrap();

        assert_eq!(transport.flags_calls(), 1);
        assert!(!flags.get_flag("version").unwrap().is_default);
    }

    #[test]
    fn remote_failure_uses_default_handler() {
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(EnvironmentStore::new());
        let resolver = resolver(&transport, &store, Some(default_handler()), false);

        let flags = resolver
            .remote_identity_flags("id", &Traits::new())
            .unwrap();

        assert!(flags.is_empty());
        let flag = flags.get_flag("anything").unwrap();
        assert!(flag.is_default);
        assert_eq!(flag.value, FeatureValue::String("default".into()));
    }

    #[test]
    fn remote_failure_without_fallback_propagates() {
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(EnvironmentStore::new());
        let resolver = resolver(&transport, &store, None, false);

        assert!(matches!(
            resolver.remote_environment_flags(),
            Err(Error::UnexpectedStatus(500))
        ));
    }

    #[test]
    fn remote_success_is_not_replaced_by_fallback() {
        let transport = Arc::new(RecordingTransport::default());
        transport.set_flags(vec![FeatureResult {
            key: "7".to_owned(),
            name: "remote".to_owned(),
            enabled: true,
            value: FeatureValue::Boolean(true),
            variant: None,
        }]);
        let store = Arc::new(EnvironmentStore::new());
        store.set_environment(environment_at(Utc::now()));
        let resolver = resolver(&transport, &store, None, true);

        let flags = resolver.remote_environment_flags().unwrap();

        assert_eq!(flags.len(), 1);
        assert!(flags.is_feature_enabled("remote").unwrap());
    }
}
