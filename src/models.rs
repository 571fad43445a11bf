use std::{collections::HashMap, fmt, sync::Arc};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{
    analytics::AnalyticsProcessor, environment::Feature, handlers::DefaultFlagHandler, Error,
    Result,
};

/// Value of a feature (or a trait).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, From)]
#[serde(untagged)]
pub enum FeatureValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    #[default]
    Null,
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FeatureValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
    /// Returns the value as a float. Integers are converted.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(f) => Some(*f),
            FeatureValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FeatureValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Value of an identity trait.
pub type TraitValue = FeatureValue;

/// Identity traits used in segment matching, keyed by trait key.
pub type Traits = HashMap<String, TraitValue>;

/// An identity together with its traits, as passed to an [`Evaluator`](crate::Evaluator).
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityContext {
    pub identifier: String,
    pub traits: Traits,
}

impl IdentityContext {
    pub fn new(identifier: impl Into<String>, traits: Traits) -> Self {
        IdentityContext {
            identifier: identifier.into(),
            traits,
        }
    }
}

/// A single feature evaluation produced by an [`Evaluator`](crate::Evaluator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub value: FeatureValue,
    /// Multivariate option the identity was bucketed into, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Flag as returned from the flags API endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ApiFlag {
    pub enabled: bool,
    #[serde(default)]
    pub feature_state_value: FeatureValue,
    pub feature: Feature,
}

impl From<ApiFlag> for FeatureResult {
    fn from(flag: ApiFlag) -> Self {
        FeatureResult {
            key: flag.feature.id.to_string(),
            name: flag.feature.name,
            enabled: flag.enabled,
            value: flag.feature_state_value,
            variant: None,
        }
    }
}

/// Value returned by a [`DefaultFlagHandler`] for a feature that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultFlag {
    pub enabled: bool,
    pub value: FeatureValue,
}

/// A resolved flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    /// Key of the feature. `None` for flags produced by a default flag handler.
    pub feature_key: Option<String>,
    pub feature_name: String,
    pub enabled: bool,
    pub value: FeatureValue,
    pub variant: Option<String>,
    /// `true` if the flag came from the default flag handler rather than from the
    /// environment.
    pub is_default: bool,
}

impl Flag {
    fn from_default(feature_name: &str, default: DefaultFlag) -> Flag {
        Flag {
            feature_key: None,
            feature_name: feature_name.to_owned(),
            enabled: default.enabled,
            value: default.value,
            variant: None,
            is_default: true,
        }
    }
}

impl From<FeatureResult> for Flag {
    fn from(result: FeatureResult) -> Self {
        Flag {
            feature_key: Some(result.key),
            feature_name: result.name,
            enabled: result.enabled,
            value: result.value,
            variant: result.variant,
            is_default: false,
        }
    }
}

/// A segment the identity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u64,
    pub name: String,
}

/// Immutable set of flags produced by a single resolution call.
///
/// Lookups of present flags are reported to analytics (if enabled). Lookups of missing flags
/// fall back to the default flag handler, if configured.
#[derive(Clone, Default)]
pub struct Flags {
    flags: HashMap<String, Flag>,
    default_flag_handler: Option<Arc<dyn DefaultFlagHandler + Send + Sync>>,
    analytics: Option<Arc<AnalyticsProcessor>>,
}

impl Flags {
    pub(crate) fn new(
        results: impl IntoIterator<Item = FeatureResult>,
        default_flag_handler: Option<Arc<dyn DefaultFlagHandler + Send + Sync>>,
        analytics: Option<Arc<AnalyticsProcessor>>,
    ) -> Flags {
        let flags = results
            .into_iter()
            .map(|result| (result.name.clone(), Flag::from(result)))
            .collect();
        Flags {
            flags,
            default_flag_handler,
            analytics,
        }
    }

    /// Flags that only answer from the default flag handler.
    pub(crate) fn from_default_handler(
        default_flag_handler: Arc<dyn DefaultFlagHandler + Send + Sync>,
    ) -> Flags {
        Flags {
            flags: HashMap::new(),
            default_flag_handler: Some(default_flag_handler),
            analytics: None,
        }
    }

    /// Get a flag by feature name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureNotFound`] if the feature is missing and no default flag handler
    /// is configured.
    pub fn get_flag(&self, feature_name: &str) -> Result<Flag> {
        let Some(flag) = self.flags.get(feature_name) else {
            return match &self.default_flag_handler {
                Some(handler) => Ok(Flag::from_default(
                    feature_name,
                    handler.get_default_flag(feature_name),
                )),
                None => Err(Error::FeatureNotFound(feature_name.to_owned())),
            };
        };

        if let Some(analytics) = &self.analytics {
            analytics.track_feature(feature_name);
        }

        Ok(flag.clone())
    }

    /// Check whether a feature is enabled.
    pub fn is_feature_enabled(&self, feature_name: &str) -> Result<bool> {
        self.get_flag(feature_name).map(|flag| flag.enabled)
    }

    /// Get the value of a feature.
    pub fn get_feature_value(&self, feature_name: &str) -> Result<FeatureValue> {
        self.get_flag(feature_name).map(|flag| flag.value)
    }

    /// All flags in the set. Does not report to analytics.
    pub fn all_flags(&self) -> Vec<Flag> {
        self.flags.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flags")
            .field("flags", &self.flags)
            .field("has_default_flag_handler", &self.default_flag_handler.is_some())
            .field("analytics_enabled", &self.analytics.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DefaultFlag, FeatureResult, FeatureValue, Flags};
    use crate::{
        analytics::AnalyticsProcessor, testing::RecordingTransport, Error, Transport,
    };

    fn result(name: &str, value: FeatureValue) -> FeatureResult {
        FeatureResult {
            key: "1".to_owned(),
            name: name.to_owned(),
            enabled: true,
            value,
            variant: None,
        }
    }

    #[test]
    fn feature_value_untagged() {
        let values: Vec<FeatureValue> =
            serde_json::from_str(r#"[true, 42, 4.2, "text", null]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FeatureValue::Boolean(true),
                FeatureValue::Integer(42),
                FeatureValue::Float(4.2),
                FeatureValue::String("text".into()),
                FeatureValue::Null,
            ]
        );
        assert_eq!(values[1].as_float(), Some(42.0));
    }

    #[test]
    fn missing_flag_without_handler() {
        let flags = Flags::new(vec![], None, None);

        assert!(matches!(
            flags.get_flag("missing"),
            Err(Error::FeatureNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn hit_is_verbatim_and_tracked() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = Arc::new(AnalyticsProcessor::new(
            transport.clone() as Arc<dyn Transport>
        ));
        let flags = Flags::new(
            vec![result("feature", "value".into())],
            Some(Arc::new(|_: &str| DefaultFlag::default())),
            Some(analytics.clone()),
        );

        let flag = flags.get_flag("feature").unwrap();

        assert!(!flag.is_default);
        assert_eq!(flag.value, FeatureValue::String("value".into()));
        assert_eq!(flag.feature_key.as_deref(), Some("1"));
        assert_eq!(analytics.pending().get("feature"), Some(&1));
    }

    #[test]
    fn miss_uses_default_handler_and_is_not_tracked() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = Arc::new(AnalyticsProcessor::new(
            transport.clone() as Arc<dyn Transport>
        ));
        let flags = Flags::new(
            vec![result("feature", "value".into())],
            Some(Arc::new(|_: &str| DefaultFlag {
                enabled: true,
                value: "default".into(),
            })),
            Some(analytics.clone()),
        );

        let flag = flags.get_flag("x").unwrap();

        assert!(flag.is_default);
        assert!(flag.enabled);
        assert_eq!(flag.feature_name, "x");
        assert_eq!(flag.value, FeatureValue::String("default".into()));
        assert!(analytics.pending().is_empty());
    }

    #[test]
    fn all_flags_does_not_track() {
        let transport = Arc::new(RecordingTransport::default());
        let analytics = Arc::new(AnalyticsProcessor::new(
            transport.clone() as Arc<dyn Transport>
        ));
        let flags = Flags::new(
            vec![result("a", true.into()), result("b", 1i64.into())],
            None,
            Some(analytics.clone()),
        );

        assert_eq!(flags.all_flags().len(), 2);
        assert!(analytics.pending().is_empty());
        assert!(flags.is_feature_enabled("a").unwrap());
        assert_eq!(flags.get_feature_value("b").unwrap(), FeatureValue::Integer(1));
    }
}
