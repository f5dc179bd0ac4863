use super::{
    user_profile::UserProfileTracker, DecisionSource, FeatureDecision, ForcedVariationStore,
    UserProfileService,
};
use crate::{
    bucketer::Bucketer,
    conditions::evaluate_audience,
    config::{Experiment, FeatureFlag, GroupPolicy, ProjectConfig, Rollout, Variation},
    error::{DecisionFailure, EntityKind},
    error_handler::{ErrorHandler, NoopErrorHandler},
    sharder::{Murmur3Sharder, Sharder},
    AttributeValue, Attributes, DecisionError, Result, BUCKETING_ID_ATTRIBUTE,
};

/// Decides which variation of an experiment, or which rule of a feature, a user gets.
///
/// Decisions are made against the [`ProjectConfig`] snapshot passed into each call. The service
/// itself only owns the forced-variation overrides and the optional profile service, so it can
/// be shared between threads.
pub struct DecisionService<S = Murmur3Sharder> {
    bucketer: Bucketer<S>,
    forced_variations: ForcedVariationStore,
    user_profile_service: Option<Box<dyn UserProfileService + Send + Sync>>,
    error_handler: Box<dyn ErrorHandler + Send + Sync>,
}

impl Default for DecisionService {
    fn default() -> Self {
        DecisionService::new()
    }
}

impl DecisionService {
    pub fn new() -> Self {
        DecisionService::with_bucketer(Bucketer::new())
    }
}

impl<S: Sharder> DecisionService<S> {
    pub fn with_bucketer(bucketer: Bucketer<S>) -> Self {
        DecisionService {
            bucketer,
            forced_variations: ForcedVariationStore::new(),
            user_profile_service: None,
            error_handler: Box::new(NoopErrorHandler),
        }
    }

    pub fn with_user_profile_service(
        mut self,
        service: impl UserProfileService + Send + Sync + 'static,
    ) -> Self {
        self.user_profile_service = Some(Box::new(service));
        self
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler + Send + Sync + 'static) -> Self {
        self.error_handler = Box::new(handler);
        self
    }

    pub(crate) fn set_user_profile_service(
        &mut self,
        service: Option<Box<dyn UserProfileService + Send + Sync>>,
    ) {
        self.user_profile_service = service;
    }

    pub(crate) fn set_error_handler(&mut self, handler: Box<dyn ErrorHandler + Send + Sync>) {
        self.error_handler = handler;
    }

    pub fn bucketer(&self) -> &Bucketer<S> {
        &self.bucketer
    }

    pub fn forced_variations(&self) -> &ForcedVariationStore {
        &self.forced_variations
    }

    /// Variation of `experiment` for the user, or `None` if the user is not in the experiment.
    ///
    /// Precedence: experiment status, forced variation, whitelist, mutually exclusive group,
    /// stored profile decision, audience, bucketing. A fresh bucketing decision is saved to the
    /// profile service.
    pub fn get_variation<'a>(
        &self,
        config: &ProjectConfig,
        experiment: &'a Experiment,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<&'a Variation>> {
        if user_id.is_empty() {
            self.report(DecisionError::EmptyUserId)?;
            return Ok(None);
        }

        let mut tracker = self.profile_tracker(user_id);
        let result = self.decide_experiment(config, experiment, user_id, attributes, &mut tracker);
        if let Some(tracker) = tracker {
            tracker.save();
        }

        match result {
            Ok(variation) => {
                log::info!(target: "experiment_engine",
                    user_id = user_id,
                    experiment_key:display = experiment.key,
                    variation_key:display = variation.key;
                    "user is in variation");
                Ok(Some(variation))
            }
            Err(failure) => {
                self.handle_failure(&experiment.key, user_id, failure)?;
                Ok(None)
            }
        }
    }

    /// Decide a feature flag: feature-test experiments first, in order, then rollout rules.
    ///
    /// When nothing matches the decision has no experiment and no variation, and its source is
    /// [`DecisionSource::Rollout`].
    pub fn get_variation_for_feature<'a>(
        &self,
        config: &'a ProjectConfig,
        feature: &'a FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<FeatureDecision<'a>> {
        if user_id.is_empty() {
            self.report(DecisionError::EmptyUserId)?;
            return Ok(FeatureDecision::none());
        }

        let mut tracker = self.profile_tracker(user_id);
        let result = self.decide_feature_test(config, feature, user_id, attributes, &mut tracker);
        if let Some(tracker) = tracker {
            tracker.save();
        }
        if let Some(decision) = result? {
            return Ok(decision);
        }

        let decision = self.decide_feature_rollout(config, feature, user_id, attributes)?;
        log::info!(target: "experiment_engine",
            user_id = user_id,
            feature_key:display = feature.key,
            source:display = decision.source,
            feature_enabled = decision.is_feature_enabled();
            "decided feature");
        Ok(decision)
    }

    /// Force (or, with `None`, clear) the variation a user gets in `experiment`.
    ///
    /// Returns `Ok(false)` when the input is rejected and the error handler does not raise.
    pub fn set_forced_variation(
        &self,
        experiment: &Experiment,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<bool> {
        if user_id.is_empty() {
            self.report(DecisionError::EmptyUserId)?;
            return Ok(false);
        }

        let variation_id = match variation_key {
            None => None,
            Some("") => {
                self.report(DecisionError::EmptyKey(EntityKind::Variation))?;
                return Ok(false);
            }
            Some(key) => match experiment.variation_by_key(key) {
                Some(variation) => Some(variation.id.as_str()),
                None => {
                    self.report(DecisionError::UnknownVariationKey {
                        experiment_key: experiment.key.clone(),
                        variation_key: key.to_owned(),
                    })?;
                    return Ok(false);
                }
            },
        };

        self.forced_variations
            .set(&experiment.id, user_id, variation_id);
        match variation_key {
            Some(variation_key) => log::info!(target: "experiment_engine",
                user_id = user_id,
                experiment_key:display = experiment.key,
                variation_key = variation_key;
                "set forced variation"),
            None => log::info!(target: "experiment_engine",
                user_id = user_id,
                experiment_key:display = experiment.key;
                "cleared forced variation"),
        }
        Ok(true)
    }

    /// Forced variation of the user, if one is set and the variation still exists.
    pub fn get_forced_variation<'a>(
        &self,
        experiment: &'a Experiment,
        user_id: &str,
    ) -> Option<&'a Variation> {
        let variation_id = self.forced_variations.get(&experiment.id, user_id)?;
        let variation = experiment.variation_by_id(&variation_id);
        if variation.is_none() {
            log::warn!(target: "experiment_engine",
                user_id = user_id,
                experiment_key:display = experiment.key,
                variation_id:display = variation_id;
                "forced variation is no longer in the experiment, ignoring it");
        }
        variation
    }

    /// Log an abnormal decision error and pass it to the error handler.
    pub(crate) fn report(&self, error: DecisionError) -> Result<()> {
        log::error!(target: "experiment_engine", "{error}");
        self.error_handler.handle_error(error)
    }

    fn handle_failure(
        &self,
        experiment_key: &str,
        user_id: &str,
        failure: DecisionFailure,
    ) -> Result<()> {
        match failure {
            DecisionFailure::Error(err) => self.report(err),
            normal => {
                log::info!(target: "experiment_engine",
                    user_id = user_id,
                    experiment_key = experiment_key;
                    "user is not in experiment: {normal}");
                Ok(())
            }
        }
    }

    fn profile_tracker<'s>(&'s self, user_id: &'s str) -> Option<UserProfileTracker<'s>> {
        self.user_profile_service
            .as_deref()
            .map(|service| UserProfileTracker::new(service, user_id))
    }

    fn decide_experiment<'a>(
        &self,
        config: &ProjectConfig,
        experiment: &'a Experiment,
        user_id: &str,
        attributes: &Attributes,
        tracker: &mut Option<UserProfileTracker<'_>>,
    ) -> std::result::Result<&'a Variation, DecisionFailure> {
        if !experiment.is_active() {
            return Err(DecisionFailure::ExperimentNotRunning);
        }

        if let Some(variation) = self.get_forced_variation(experiment, user_id) {
            log::info!(target: "experiment_engine",
                user_id = user_id,
                experiment_key:display = experiment.key,
                variation_key:display = variation.key;
                "user has a forced variation");
            return Ok(variation);
        }

        if let Some(variation) = whitelisted_variation(experiment, user_id) {
            return Ok(variation);
        }

        let bucketing_id = bucketing_id(user_id, attributes);

        if let Some(group_id) = &experiment.group_id {
            let group = config
                .group(group_id)
                .ok_or_else(|| DecisionError::missing(EntityKind::Group, group_id))?;
            if group.policy == GroupPolicy::Random {
                let member =
                    self.bucketer
                        .bucket(bucketing_id, &group.id, &group.traffic_allocation);
                if member != Some(experiment.id.as_str()) {
                    return Err(DecisionFailure::ExcludedByGroup);
                }
            }
        }

        if let Some(tracker) = tracker.as_mut() {
            if let Some(variation) = tracker.stored_variation(experiment) {
                return Ok(variation);
            }
        }

        if !evaluate_audience(config, experiment, attributes).is_true() {
            return Err(DecisionFailure::AudienceMismatch);
        }

        let variation = self
            .bucket_variation(experiment, bucketing_id)?
            .ok_or(DecisionFailure::NotAllocated)?;

        if let Some(tracker) = tracker.as_mut() {
            tracker.update(experiment, variation);
        }
        Ok(variation)
    }

    fn decide_feature_test<'a>(
        &self,
        config: &'a ProjectConfig,
        feature: &'a FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
        tracker: &mut Option<UserProfileTracker<'_>>,
    ) -> Result<Option<FeatureDecision<'a>>> {
        for experiment_id in &feature.experiment_ids {
            let Some(experiment) = config.experiment(experiment_id) else {
                self.report(DecisionError::missing(EntityKind::Experiment, experiment_id))?;
                continue;
            };
            match self.decide_experiment(config, experiment, user_id, attributes, tracker) {
                Ok(variation) => {
                    log::info!(target: "experiment_engine",
                        user_id = user_id,
                        feature_key:display = feature.key,
                        experiment_key:display = experiment.key,
                        variation_key:display = variation.key;
                        "user is in a feature test");
                    return Ok(Some(FeatureDecision::matched(
                        experiment,
                        variation,
                        DecisionSource::FeatureTest,
                    )));
                }
                Err(failure) => self.handle_failure(&experiment.key, user_id, failure)?,
            }
        }
        Ok(None)
    }

    fn decide_feature_rollout<'a>(
        &self,
        config: &'a ProjectConfig,
        feature: &'a FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<FeatureDecision<'a>> {
        if feature.rollout_id.is_empty() {
            log::info!(target: "experiment_engine",
                feature_key:display = feature.key;
                "feature is not used in a rollout");
            return Ok(FeatureDecision::none());
        }
        let Some(rollout) = config.rollout(&feature.rollout_id) else {
            self.report(DecisionError::missing(
                EntityKind::Rollout,
                &feature.rollout_id,
            ))?;
            return Ok(FeatureDecision::none());
        };

        match self.decide_rollout(config, rollout, user_id, attributes) {
            Ok(Some((rule, variation))) => Ok(FeatureDecision::matched(
                rule,
                variation,
                DecisionSource::Rollout,
            )),
            Ok(None) => Ok(FeatureDecision::none()),
            Err(err) => {
                self.report(err)?;
                Ok(FeatureDecision::none())
            }
        }
    }

    /// Walk targeting rules in order. The first rule whose audience matches is the only
    /// targeting rule tried: if the user misses its traffic, evaluation skips straight to the
    /// last ("everyone else") rule.
    fn decide_rollout<'a>(
        &self,
        config: &ProjectConfig,
        rollout: &'a Rollout,
        user_id: &str,
        attributes: &Attributes,
    ) -> std::result::Result<Option<(&'a Experiment, &'a Variation)>, DecisionError> {
        let Some((everyone_else, targeting_rules)) = rollout.experiments.split_last() else {
            return Ok(None);
        };
        let bucketing_id = bucketing_id(user_id, attributes);

        for (index, rule) in targeting_rules.iter().enumerate() {
            if !evaluate_audience(config, rule, attributes).is_true() {
                log::debug!(target: "experiment_engine",
                    user_id = user_id,
                    rule = index + 1;
                    "user does not meet targeting rule audience");
                continue;
            }
            match self.bucket_variation(rule, bucketing_id)? {
                Some(variation) => return Ok(Some((rule, variation))),
                None => {
                    log::debug!(target: "experiment_engine",
                        user_id = user_id,
                        rule = index + 1;
                        "user is not in targeting rule traffic, trying everyone else rule");
                    break;
                }
            }
        }

        if !evaluate_audience(config, everyone_else, attributes).is_true() {
            return Ok(None);
        }
        Ok(self
            .bucket_variation(everyone_else, bucketing_id)?
            .map(|variation| (everyone_else, variation)))
    }

    fn bucket_variation<'a>(
        &self,
        experiment: &'a Experiment,
        bucketing_id: &str,
    ) -> std::result::Result<Option<&'a Variation>, DecisionError> {
        let Some(variation_id) =
            self.bucketer
                .bucket(bucketing_id, &experiment.id, &experiment.traffic_allocation)
        else {
            return Ok(None);
        };
        experiment
            .variation_by_id(variation_id)
            .map(Some)
            .ok_or_else(|| DecisionError::missing(EntityKind::Variation, variation_id))
    }
}

/// Variation the experiment whitelists for the user. A whitelisted key missing from the
/// experiment is logged and ignored.
fn whitelisted_variation<'a>(experiment: &'a Experiment, user_id: &str) -> Option<&'a Variation> {
    let variation_key = experiment.forced_variations.get(user_id)?;
    let variation = experiment.variation_by_key(variation_key);
    match variation {
        Some(variation) => log::info!(target: "experiment_engine",
            user_id = user_id,
            experiment_key:display = experiment.key,
            variation_key:display = variation.key;
            "user is whitelisted into variation"),
        None => log::error!(target: "experiment_engine",
            user_id = user_id,
            experiment_key:display = experiment.key,
            variation_key:display = variation_key;
            "whitelisted variation is not in the experiment, ignoring whitelist"),
    }
    variation
}

/// The id users are bucketed by: the `$opt_bucketing_id` attribute when it is a non-empty
/// string, the user id otherwise.
pub fn bucketing_id<'a>(user_id: &'a str, attributes: &'a Attributes) -> &'a str {
    match attributes.get(BUCKETING_ID_ATTRIBUTE) {
        Some(AttributeValue::String(id)) if !id.is_empty() => id.as_str(),
        None | Some(AttributeValue::String(_)) => user_id,
        Some(other) => {
            log::warn!(target: "experiment_engine",
                user_id = user_id,
                attribute_type = other.type_name();
                "bucketing id attribute is not a string, using user id");
            user_id
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::{bucketing_id, DecisionService};
    use crate::{
        bucketer::Bucketer,
        config::ProjectConfig,
        decision::{
            DecisionSource, InMemoryUserProfileService, StoredDecision, UserProfile,
            UserProfileService, UserProfileServiceError,
        },
        error::EntityKind,
        error_handler::RaiseErrorHandler,
        sharder::DeterministicSharder,
        test_support::{edited_config, init_logger, test_config},
        AttributeValue, Attributes, DecisionError, Error,
    };

    fn attrs(values: &[(&str, AttributeValue)]) -> Attributes {
        values
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn variation_key(
        service: &DecisionService<impl crate::sharder::Sharder>,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Option<String> {
        let experiment = config.experiment_by_key(experiment_key).unwrap();
        service
            .get_variation(config, experiment, user_id, attributes)
            .unwrap()
            .map(|variation| variation.key.clone())
    }

    fn experiment_json<'v>(datafile: &'v mut Value, key: &str) -> &'v mut Value {
        datafile["experiments"]
            .as_array_mut()
            .unwrap()
            .iter_mut()
            .find(|experiment| experiment["key"] == key)
            .unwrap()
    }

    struct FailingProfileService;

    impl UserProfileService for FailingProfileService {
        fn lookup(&self, _user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError> {
            Err("lookup failed".into())
        }

        fn save(&self, _profile: &UserProfile) -> Result<(), UserProfileServiceError> {
            Err("save failed".into())
        }
    }

    #[test]
    fn bucketing_id_attribute() {
        let user = "user-1";
        assert_eq!(bucketing_id(user, &Attributes::new()), "user-1");
        assert_eq!(
            bucketing_id(user, &attrs(&[("$opt_bucketing_id", "device-9".into())])),
            "device-9"
        );
        assert_eq!(
            bucketing_id(user, &attrs(&[("$opt_bucketing_id", "".into())])),
            "user-1"
        );
        assert_eq!(
            bucketing_id(user, &attrs(&[("$opt_bucketing_id", 5.0.into())])),
            "user-1"
        );
    }

    #[test]
    fn bucketing_id_drives_bucketing() {
        let config = test_config();
        let service = DecisionService::with_bucketer(Bucketer::with_sharder(
            DeterministicSharder::new([("device-910001", 7000), ("someone10001", 1000)]),
        ));

        let with_bucketing_id = attrs(&[("$opt_bucketing_id", "device-9".into())]);
        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "someone", &with_bucketing_id),
            Some("treatment".to_owned())
        );
        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "someone", &Attributes::new()),
            Some("control".to_owned())
        );
    }

    #[test]
    fn same_bucketing_id_same_variation() {
        let config = test_config();
        let service = DecisionService::new();
        for i in 0..50 {
            let attributes = attrs(&[("$opt_bucketing_id", format!("device-{i}").into())]);
            assert_eq!(
                variation_key(&service, &config, "basic_experiment", "alice", &attributes),
                variation_key(&service, &config, "basic_experiment", "bob", &attributes),
            );
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let config = test_config();
        let service = DecisionService::new();
        for i in 0..100 {
            let user = format!("user-{i}");
            let first = variation_key(&service, &config, "basic_experiment", &user, &Attributes::new());
            let second = variation_key(&service, &config, "basic_experiment", &user, &Attributes::new());
            assert!(first.is_some());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn experiment_status() {
        let config = test_config();
        let service = DecisionService::new();
        assert_eq!(
            variation_key(&service, &config, "paused_experiment", "user-1", &Attributes::new()),
            None
        );
        assert_eq!(
            variation_key(&service, &config, "launched_experiment", "user-1", &Attributes::new()),
            Some("launched".to_owned())
        );
    }

    #[test]
    fn forced_variation_overrides_bucketing() {
        let config = test_config();
        let service = DecisionService::new();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();

        for key in ["control", "treatment"] {
            assert!(service
                .set_forced_variation(experiment, "user-1", Some(key))
                .unwrap());
            assert_eq!(
                variation_key(&service, &config, "basic_experiment", "user-1", &Attributes::new()),
                Some(key.to_owned())
            );
            assert_eq!(
                service.get_forced_variation(experiment, "user-1").map(|v| v.key.as_str()),
                Some(key)
            );
        }

        assert!(service
            .set_forced_variation(experiment, "user-1", None)
            .unwrap());
        assert_eq!(service.get_forced_variation(experiment, "user-1"), None);
    }

    #[test]
    fn forced_variation_beats_whitelist() {
        let config = test_config();
        let service = DecisionService::new();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();
        service
            .set_forced_variation(experiment, "whitelisted_user", Some("control"))
            .unwrap();
        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "whitelisted_user", &Attributes::new()),
            Some("control".to_owned())
        );
    }

    #[test]
    fn forced_variation_on_paused_experiment_is_denied() {
        let config = test_config();
        let service = DecisionService::new();
        let experiment = config.experiment_by_key("paused_experiment").unwrap();
        assert!(service
            .set_forced_variation(experiment, "user-1", Some("only"))
            .unwrap());
        assert_eq!(
            variation_key(&service, &config, "paused_experiment", "user-1", &Attributes::new()),
            None
        );
    }

    #[test]
    fn set_forced_variation_validates_input() {
        let config = test_config();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();

        let service = DecisionService::new();
        assert!(!service
            .set_forced_variation(experiment, "user-1", Some("missing"))
            .unwrap());
        assert!(!service
            .set_forced_variation(experiment, "", Some("control"))
            .unwrap());
        assert!(!service
            .set_forced_variation(experiment, "user-1", Some(""))
            .unwrap());
        assert!(service.forced_variations().is_empty());

        let service = DecisionService::new().with_error_handler(RaiseErrorHandler);
        let result = service.set_forced_variation(experiment, "user-1", Some("missing"));
        assert!(matches!(
            result,
            Err(Error::Decision(DecisionError::UnknownVariationKey { .. }))
        ));
    }

    #[test]
    fn stale_forced_variation_is_ignored() {
        let config = test_config();
        let service = DecisionService::new();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();
        service
            .set_forced_variation(experiment, "user-1", Some("treatment"))
            .unwrap();

        // Next revision drops "treatment".
        let edited = edited_config(|datafile| {
            let experiment = experiment_json(datafile, "basic_experiment");
            experiment["variations"] = json!([{ "id": "20001", "key": "control" }]);
            experiment["trafficAllocation"] = json!([{ "entityId": "20001", "endOfRange": 10000 }]);
        });
        let edited_experiment = edited.experiment_by_key("basic_experiment").unwrap();
        assert_eq!(service.get_forced_variation(edited_experiment, "user-1"), None);
        assert_eq!(
            variation_key(&service, &edited, "basic_experiment", "user-1", &Attributes::new()),
            Some("control".to_owned())
        );
    }

    #[test]
    fn whitelisting() {
        let config = test_config();
        let service = DecisionService::with_bucketer(Bucketer::with_sharder(
            DeterministicSharder::new([("broken_whitelist_user10001", 100)]),
        ));
        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "whitelisted_user", &Attributes::new()),
            Some("treatment".to_owned())
        );
        // Whitelists do not override the experiment status.
        assert_eq!(
            variation_key(&service, &config, "paused_experiment", "whitelisted_user", &Attributes::new()),
            None
        );
        // A whitelisted key missing from the experiment falls back to bucketing.
        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "broken_whitelist_user", &Attributes::new()),
            Some("control".to_owned())
        );
    }

    #[test]
    fn audience_targeting() {
        let config = test_config();
        let service = DecisionService::new();

        let chrome = attrs(&[("browser_type", "chrome".into())]);
        let safari = attrs(&[("browser_type", "safari".into())]);
        assert_eq!(
            variation_key(&service, &config, "targeted_experiment", "user-1", &chrome),
            Some("a".to_owned())
        );
        assert_eq!(
            variation_key(&service, &config, "targeted_experiment", "user-1", &safari),
            None
        );
        assert_eq!(
            variation_key(&service, &config, "targeted_experiment", "user-1", &Attributes::new()),
            None
        );

        assert_eq!(
            variation_key(&service, &config, "typed_audience_experiment", "user-1", &attrs(&[("age", 21.0.into())])),
            Some("adult_variation".to_owned())
        );
        assert_eq!(
            variation_key(&service, &config, "typed_audience_experiment", "user-1", &attrs(&[("age", "21".into())])),
            None
        );

        // not(country == "US") with no country is unknown, which denies.
        assert_eq!(
            variation_key(&service, &config, "non_us_experiment", "user-1", &Attributes::new()),
            None
        );
        assert_eq!(
            variation_key(&service, &config, "non_us_experiment", "user-1", &attrs(&[("country", "CA".into())])),
            Some("non_us".to_owned())
        );
    }

    #[test]
    fn zero_traffic_is_not_allocated() {
        let config = test_config();
        let service = DecisionService::new();
        for i in 0..50 {
            assert_eq!(
                variation_key(&service, &config, "holdout_experiment", &format!("user-{i}"), &Attributes::new()),
                None
            );
        }
    }

    #[test]
    fn mutually_exclusive_group() {
        let config = test_config();
        let service = DecisionService::new();
        let mut counts = [0, 0];
        for i in 0..500 {
            let user = format!("user-{i}");
            let first = variation_key(&service, &config, "group_experiment_1", &user, &Attributes::new());
            let second = variation_key(&service, &config, "group_experiment_2", &user, &Attributes::new());
            assert!(
                first.is_some() != second.is_some(),
                "{user} must be in exactly one group member"
            );
            counts[usize::from(second.is_some())] += 1;
        }
        assert!(counts[0] > 150 && counts[1] > 150, "{counts:?}");
    }

    #[test]
    fn group_bucketing_uses_group_id() {
        let config = test_config();
        let service = DecisionService::with_bucketer(Bucketer::with_sharder(
            DeterministicSharder::new([("user-130001", 6234)]),
        ));
        assert_eq!(
            variation_key(&service, &config, "group_experiment_1", "user-1", &Attributes::new()),
            None
        );
        assert_eq!(
            variation_key(&service, &config, "group_experiment_2", "user-1", &Attributes::new()),
            Some("group_two".to_owned())
        );
    }

    #[test]
    fn overlapping_group_does_not_exclude() {
        let config = test_config();
        let service = DecisionService::new();
        for i in 0..50 {
            assert_eq!(
                variation_key(&service, &config, "overlapping_experiment", &format!("user-{i}"), &Attributes::new()),
                Some("overlap".to_owned())
            );
        }
    }

    #[test]
    fn profile_keeps_decision_after_allocation_change() {
        init_logger();
        let config = test_config();
        let profiles = Arc::new(InMemoryUserProfileService::default());
        let sharder = || DeterministicSharder::new([("sticky10001", 1000)]);
        let service = DecisionService::with_bucketer(Bucketer::with_sharder(sharder()))
            .with_user_profile_service(Arc::clone(&profiles));

        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "sticky", &Attributes::new()),
            Some("control".to_owned())
        );
        let profile = profiles.lookup("sticky").unwrap().unwrap();
        assert_eq!(profile.variation_id("10001"), Some("20001"));

        // Everyone goes to treatment now.
        let edited = edited_config(|datafile| {
            experiment_json(datafile, "basic_experiment")["trafficAllocation"] =
                json!([{ "entityId": "20002", "endOfRange": 10000 }]);
        });
        assert_eq!(
            variation_key(&service, &edited, "basic_experiment", "sticky", &Attributes::new()),
            Some("control".to_owned())
        );

        let without_profiles = DecisionService::with_bucketer(Bucketer::with_sharder(sharder()));
        assert_eq!(
            variation_key(&without_profiles, &edited, "basic_experiment", "sticky", &Attributes::new()),
            Some("treatment".to_owned())
        );
    }

    #[test]
    fn stale_profile_decision_is_replaced() {
        let config = test_config();
        let profiles = Arc::new(InMemoryUserProfileService::default());
        let mut profile = UserProfile::new("user-1");
        profile.experiment_bucket_map.insert(
            "10001".to_owned(),
            StoredDecision {
                variation_id: "deleted".to_owned(),
            },
        );
        profiles.save(&profile).unwrap();

        let service = DecisionService::with_bucketer(Bucketer::with_sharder(
            DeterministicSharder::new([("user-110001", 9000)]),
        ))
        .with_user_profile_service(Arc::clone(&profiles));
        assert_eq!(
            variation_key(&service, &config, "basic_experiment", "user-1", &Attributes::new()),
            Some("treatment".to_owned())
        );
        let profile = profiles.lookup("user-1").unwrap().unwrap();
        assert_eq!(profile.variation_id("10001"), Some("20002"));
    }

    #[test]
    fn forced_and_whitelisted_decisions_are_not_saved() {
        let config = test_config();
        let profiles = Arc::new(InMemoryUserProfileService::default());
        let service = DecisionService::new().with_user_profile_service(Arc::clone(&profiles));
        let experiment = config.experiment_by_key("basic_experiment").unwrap();

        service
            .set_forced_variation(experiment, "forced_user", Some("control"))
            .unwrap();
        variation_key(&service, &config, "basic_experiment", "forced_user", &Attributes::new());
        variation_key(&service, &config, "basic_experiment", "whitelisted_user", &Attributes::new());

        assert_eq!(profiles.lookup("forced_user").unwrap(), None);
        assert_eq!(profiles.lookup("whitelisted_user").unwrap(), None);
    }

    #[test]
    fn failing_profile_service_does_not_block_decisions() {
        let config = test_config();
        let service = DecisionService::new().with_user_profile_service(FailingProfileService);
        assert!(
            variation_key(&service, &config, "basic_experiment", "user-1", &Attributes::new())
                .is_some()
        );
    }

    #[test]
    fn config_inconsistency_follows_error_handler() {
        let config = test_config();
        let experiment = config.experiment_by_key("broken_allocation_experiment").unwrap();

        let service = DecisionService::new();
        assert_eq!(
            service
                .get_variation(&config, experiment, "user-1", &Attributes::new())
                .unwrap(),
            None
        );

        let service = DecisionService::new().with_error_handler(RaiseErrorHandler);
        let result = service.get_variation(&config, experiment, "user-1", &Attributes::new());
        assert!(matches!(
            result,
            Err(Error::Decision(DecisionError::ConfigInconsistency {
                kind: EntityKind::Variation,
                ..
            }))
        ));
    }

    #[test]
    fn empty_user_id() {
        let config = test_config();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();
        let service = DecisionService::new();
        assert_eq!(
            service
                .get_variation(&config, experiment, "", &Attributes::new())
                .unwrap(),
            None
        );

        let service = DecisionService::new().with_error_handler(RaiseErrorHandler);
        assert!(matches!(
            service.get_variation(&config, experiment, "", &Attributes::new()),
            Err(Error::Decision(DecisionError::EmptyUserId))
        ));
    }

    #[test]
    fn feature_test_decision() {
        let config = test_config();
        let service = DecisionService::new();
        let feature = config.feature_flag("boolean_feature").unwrap();
        for i in 0..50 {
            let decision = service
                .get_variation_for_feature(&config, feature, &format!("user-{i}"), &Attributes::new())
                .unwrap();
            assert_eq!(decision.source, DecisionSource::FeatureTest);
            assert!(decision.is_feature_enabled());
            let experiment = decision.experiment.unwrap();
            assert_eq!(experiment.group_id.as_deref(), Some("30001"));
        }
    }

    #[test]
    fn feature_test_shares_one_profile_save() {
        let config = test_config();
        let profiles = Arc::new(InMemoryUserProfileService::default());
        let service = DecisionService::new().with_user_profile_service(Arc::clone(&profiles));
        let feature = config.feature_flag("boolean_feature").unwrap();

        let decision = service
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new())
            .unwrap();
        let experiment = decision.experiment.unwrap();
        let variation = decision.variation.unwrap();

        let profile = profiles.lookup("user-1").unwrap().unwrap();
        assert_eq!(profile.experiment_bucket_map.len(), 1);
        assert_eq!(profile.variation_id(&experiment.id), Some(variation.id.as_str()));
    }

    #[test]
    fn rollout_rules() {
        let config = test_config();
        let service = DecisionService::new();
        let feature = config.feature_flag("rollout_feature").unwrap();

        let chrome = attrs(&[("browser_type", "chrome".into())]);
        let decision = service
            .get_variation_for_feature(&config, feature, "user-1", &chrome)
            .unwrap();
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert_eq!(decision.experiment.map(|e| e.id.as_str()), Some("70001"));
        assert!(decision.is_feature_enabled());

        let decision = service
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new())
            .unwrap();
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert_eq!(decision.experiment.map(|e| e.id.as_str()), Some("70002"));
        assert!(!decision.is_feature_enabled());
    }

    #[test]
    fn rollout_traffic_miss_skips_to_everyone_else() {
        let config = edited_config(|datafile| {
            datafile["rollouts"][0]["experiments"] = json!([
                {
                    "id": "70001", "key": "70001", "status": "Running", "audienceIds": [],
                    "variations": [{ "id": "80001", "key": "80001", "featureEnabled": true }],
                    "trafficAllocation": [{ "entityId": "80001", "endOfRange": 0 }]
                },
                {
                    "id": "70009", "key": "70009", "status": "Running", "audienceIds": [],
                    "variations": [{ "id": "80009", "key": "80009", "featureEnabled": true }],
                    "trafficAllocation": [{ "entityId": "80009", "endOfRange": 10000 }]
                },
                {
                    "id": "70002", "key": "70002", "status": "Running", "audienceIds": [],
                    "variations": [{ "id": "80002", "key": "80002", "featureEnabled": false }],
                    "trafficAllocation": [{ "entityId": "80002", "endOfRange": 10000 }]
                }
            ]);
        });
        let service = DecisionService::new();
        let feature = config.feature_flag("rollout_feature").unwrap();
        let decision = service
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new())
            .unwrap();
        assert_eq!(decision.experiment.map(|e| e.id.as_str()), Some("70002"));
        assert_eq!(decision.variation.map(|v| v.id.as_str()), Some("80002"));
    }

    #[test]
    fn zero_width_rollout_yields_empty_decision() {
        let config = test_config();
        let service = DecisionService::new();
        let feature = config.feature_flag("zero_rollout_feature").unwrap();
        let decision = service
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new())
            .unwrap();
        assert_eq!(decision.experiment, None);
        assert_eq!(decision.variation, None);
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert!(!decision.is_feature_enabled());

        let feature = config.feature_flag("no_rollout_feature").unwrap();
        let decision = service
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new())
            .unwrap();
        assert_eq!(decision.variation, None);
        assert_eq!(decision.source, DecisionSource::Rollout);
    }

    #[test]
    fn missing_feature_references() {
        let config = test_config();
        let feature = config.feature_flag("missing_rollout_feature").unwrap();

        let decision = DecisionService::new()
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new())
            .unwrap();
        assert_eq!(decision.variation, None);

        let result = DecisionService::new()
            .with_error_handler(RaiseErrorHandler)
            .get_variation_for_feature(&config, feature, "user-1", &Attributes::new());
        assert!(matches!(
            result,
            Err(Error::Decision(DecisionError::ConfigInconsistency {
                kind: EntityKind::Experiment,
                ..
            }))
        ));
    }

    #[test]
    fn concurrent_decisions_and_overrides() {
        let config = Arc::new(test_config());
        let service = Arc::new(DecisionService::new());

        let handles = (0..8)
            .map(|t| {
                let config = Arc::clone(&config);
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    let experiment = config.experiment_by_key("basic_experiment").unwrap();
                    for i in 0..100 {
                        let user = format!("user-{t}-{i}");
                        service
                            .set_forced_variation(experiment, &user, Some("treatment"))
                            .unwrap();
                        let variation = service
                            .get_variation(&config, experiment, &user, &Attributes::new())
                            .unwrap();
                        assert_eq!(variation.map(|v| v.key.as_str()), Some("treatment"));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(service.forced_variations().len(), 800);
    }
}
