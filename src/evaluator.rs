//! Local flag evaluation against an environment document.
use crate::{
    environment::{Environment, FeatureState},
    models::{FeatureResult, FeatureValue, IdentityContext, Segment},
};

/// Evaluates an environment document for an optional identity.
///
/// Implementations must be pure: the same `(environment, identity)` pair always yields the same
/// result. Identity overrides must outrank segment overrides and environment defaults.
pub trait Evaluator: Send + Sync {
    /// Evaluate all features of `environment`, for `identity` if given.
    fn evaluate(
        &self,
        environment: &Environment,
        identity: Option<&IdentityContext>,
    ) -> Vec<FeatureResult>;

    /// Segments of `environment` that `identity` belongs to.
    fn identity_segments(
        &self,
        environment: &Environment,
        identity: &IdentityContext,
    ) -> Vec<Segment>;
}

/// The built-in evaluator.
///
/// Applies environment defaults, identity overrides and multivariate percentage splits. It
/// does not match segment rules: segment overrides are not applied and
/// [`Evaluator::identity_segments`] returns no segments. Plug in a complete rules engine with
/// [`ClientConfig::evaluator`](crate::ClientConfig::evaluator) when segments are needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEvaluator;

impl Evaluator for LocalEvaluator {
    fn evaluate(
        &self,
        environment: &Environment,
        identity: Option<&IdentityContext>,
    ) -> Vec<FeatureResult> {
        let overrides = identity
            .and_then(|identity| environment.identity_override(&identity.identifier))
            .map(|identity| identity.identity_features.as_slice())
            .unwrap_or_default();

        let identity_key =
            identity.map(|identity| format!("{}_{}", environment.api_key, identity.identifier));

        environment
            .feature_states
            .iter()
            .map(|feature_state| {
                match overrides
                    .iter()
                    .find(|o| o.feature.name == feature_state.feature.name)
                {
                    // Identity overrides never carry multivariate options.
                    Some(identity_override) => feature_result(identity_override, None),
                    None => feature_result(feature_state, identity_key.as_deref()),
                }
            })
            .collect()
    }

    fn identity_segments(
        &self,
        _environment: &Environment,
        _identity: &IdentityContext,
    ) -> Vec<Segment> {
        Vec::new()
    }
}

fn feature_result(feature_state: &FeatureState, identity_key: Option<&str>) -> FeatureResult {
    let (value, variant) = match identity_key {
        Some(identity_key) => multivariate_value(feature_state, identity_key),
        None => (feature_state.feature_state_value.clone(), None),
    };

    FeatureResult {
        key: feature_state.feature.id.to_string(),
        name: feature_state.feature.name.clone(),
        enabled: feature_state.enabled,
        value,
        variant,
    }
}

/// Pick the multivariate option `identity_key` is bucketed into. Falls back to the control
/// value when the allocations don't cover the identity's bucket.
fn multivariate_value(
    feature_state: &FeatureState,
    identity_key: &str,
) -> (FeatureValue, Option<String>) {
    let control = (feature_state.feature_state_value.clone(), None);
    if feature_state.multivariate_feature_state_values.is_empty() {
        return control;
    }

    let percentage = hashed_percentage(&[&feature_state.hash_key(), identity_key]);

    let mut values: Vec<_> = feature_state.multivariate_feature_state_values.iter().collect();
    values.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut start = 0.0;
    for value in values {
        let limit = start + value.percentage_allocation;
        if start <= percentage && percentage < limit {
            let variant = value
                .id
                .map(|id| id.to_string())
                .or_else(|| value.mv_fs_value_uuid.clone());
            return (value.multivariate_feature_option.value.clone(), variant);
        }
        start = limit;
    }

    control
}

/// Map `ids` to a stable percentage in `[0, 100)`.
pub(crate) fn hashed_percentage(ids: &[&str]) -> f64 {
    let joined = ids.join(",");
    let mut iterations = 1;
    loop {
        let hash = md5::compute(joined.repeat(iterations));
        let value = u128::from_be_bytes(hash.0) % 9999;
        let percentage = value as f64 / 9998.0 * 100.0;
        // 9998 maps to exactly 100, rehash to stay in the half-open range.
        if percentage < 100.0 {
            return percentage;
        }
        iterations += 1;
    }
}
