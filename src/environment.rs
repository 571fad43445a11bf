//! Environment document: the snapshot of flag configuration used for local evaluation.
//!
//! Only the fields consumed by this SDK are modelled. Unknown fields are ignored during
//! deserialization, so newer documents keep parsing.
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FeatureValue;

/// Full flag and segment configuration of one environment.
///
/// `Environment` is immutable once built. The client replaces it wholesale on refresh, so a
/// document obtained from [`Client::environment`](crate::Client::environment) stays consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub api_key: String,
    #[serde(default)]
    pub name: String,
    /// Time of the last change to the environment on the server.
    #[serde(default, deserialize_with = "deserialize_updated_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub feature_states: Vec<FeatureState>,
    #[serde(default)]
    pub project: Project,
    #[serde(default)]
    pub identity_overrides: Vec<IdentityOverride>,
}

impl Environment {
    /// Find the identity override for `identifier`, if any.
    pub fn identity_override(&self, identifier: &str) -> Option<&IdentityOverride> {
        self.identity_overrides
            .iter()
            .find(|identity| identity.identifier == identifier)
    }
}

/// Accepts RFC 3339 timestamps as well as naive ones, which are interpreted as UTC.
fn deserialize_updated_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub segments: Vec<SegmentModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: u64,
    pub name: String,
}

/// State of a feature in the environment (or in an identity override).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    pub feature: Feature,
    pub enabled: bool,
    #[serde(default)]
    pub feature_state_value: FeatureValue,
    #[serde(default)]
    pub django_id: Option<u64>,
    #[serde(default)]
    pub featurestate_uuid: Option<String>,
    #[serde(default)]
    pub multivariate_feature_state_values: Vec<MultivariateFeatureStateValue>,
}

impl FeatureState {
    /// Stable key used to hash identities into multivariate buckets.
    pub fn hash_key(&self) -> String {
        match (self.django_id, &self.featurestate_uuid) {
            (Some(id), _) => id.to_string(),
            (None, Some(uuid)) => uuid.clone(),
            (None, None) => self.feature.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultivariateFeatureStateValue {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub mv_fs_value_uuid: Option<String>,
    pub percentage_allocation: f64,
    pub multivariate_feature_option: MultivariateFeatureOption,
}

impl MultivariateFeatureStateValue {
    /// Ordering key. Values with a numeric id come first, in id order.
    pub(crate) fn sort_key(&self) -> (u64, &str) {
        (
            self.id.unwrap_or(u64::MAX),
            self.mv_fs_value_uuid.as_deref().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultivariateFeatureOption {
    #[serde(default)]
    pub value: FeatureValue,
}

/// A segment definition. Rules are kept as raw JSON: matching them is the job of a full
/// [`Evaluator`](crate::Evaluator) implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentModel {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
    #[serde(default)]
    pub feature_states: Vec<FeatureState>,
}

/// Per-identity feature overrides shipped with the environment document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityOverride {
    pub identifier: String,
    #[serde(default)]
    pub identity_features: Vec<FeatureState>,
}
