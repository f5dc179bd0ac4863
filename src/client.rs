use std::sync::Arc;

use chrono::Utc;

use crate::{
    config::{Experiment, FeatureFlag, ProjectConfig, VariableValue},
    configuration_store::ConfigurationStore,
    decision::DecisionService,
    error::EntityKind,
    events::DecisionNotification,
    Attributes, ClientConfig, DecisionError, DecisionListener, Result,
};

/// A client making experiment and feature decisions against the active datafile.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use experiment_engine::{Attributes, Client, ClientConfig};
/// let client = Client::new(ClientConfig::new());
/// client.set_datafile(br#"{"version": "4"}"#).unwrap();
/// assert_eq!(client.get_variation("checkout_flow", "user-1", &Attributes::new()).unwrap(), None);
/// ```
pub struct Client<'a> {
    configuration_store: Arc<ConfigurationStore>,
    decision_service: DecisionService,
    decision_listener: Box<dyn DecisionListener + Send + Sync + 'a>,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig<'a>) -> Self {
        Client::new_with_configuration_store(config, Arc::new(ConfigurationStore::new()))
    }

    /// Create a new `Client` reading its datafile from a shared store.
    pub fn new_with_configuration_store(
        config: ClientConfig<'a>,
        configuration_store: Arc<ConfigurationStore>,
    ) -> Self {
        let mut decision_service = DecisionService::new();
        decision_service.set_user_profile_service(config.user_profile_service);
        decision_service.set_error_handler(config.error_handler);
        Client {
            configuration_store,
            decision_service,
            decision_listener: config.decision_listener,
        }
    }

    pub fn configuration_store(&self) -> &Arc<ConfigurationStore> {
        &self.configuration_store
    }

    pub fn decision_service(&self) -> &DecisionService {
        &self.decision_service
    }

    /// Parse `json` and make it the active datafile. On error the previous datafile stays
    /// active.
    pub fn set_datafile(&self, json: &[u8]) -> Result<()> {
        let config = ProjectConfig::from_json(json)?;
        self.configuration_store.set_configuration(config);
        Ok(())
    }

    /// Key of the variation the user gets in the experiment.
    pub fn get_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<String>> {
        let Some(config) = self.configuration("get_variation") else {
            return Ok(None);
        };
        let Some(experiment) = self.experiment(&config, experiment_key)? else {
            return Ok(None);
        };

        let variation =
            self.decision_service
                .get_variation(&config, experiment, user_id, attributes)?;

        self.decision_listener
            .on_decision(DecisionNotification::for_experiment(
                experiment,
                variation,
                user_id,
                attributes,
                Utc::now(),
            ));

        Ok(variation.map(|variation| variation.key.clone()))
    }

    pub fn is_feature_enabled(
        &self,
        feature_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<bool> {
        let Some(config) = self.configuration("is_feature_enabled") else {
            return Ok(false);
        };
        let Some(feature) = self.feature_flag(&config, feature_key)? else {
            return Ok(false);
        };
        self.decide_feature(&config, feature, user_id, attributes)
    }

    /// Keys of all features enabled for the user, sorted.
    pub fn get_enabled_features(
        &self,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Vec<String>> {
        let Some(config) = self.configuration("get_enabled_features") else {
            return Ok(Vec::new());
        };

        // Every feature is decided against the same snapshot, even if the datafile is replaced
        // midway.
        let mut enabled = Vec::new();
        for feature in config.feature_flags() {
            if self.decide_feature(&config, feature, user_id, attributes)? {
                enabled.push(feature.key.clone());
            }
        }
        enabled.sort();
        Ok(enabled)
    }

    /// Typed value of a feature variable for the user.
    ///
    /// The variation's override applies only when the feature is enabled for the user. In every
    /// other case the variable's default value is returned.
    pub fn get_feature_variable_value(
        &self,
        feature_key: &str,
        variable_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<VariableValue>> {
        let Some(config) = self.configuration("get_feature_variable_value") else {
            return Ok(None);
        };
        let Some(feature) = self.feature_flag(&config, feature_key)? else {
            return Ok(None);
        };
        if variable_key.is_empty() {
            self.decision_service
                .report(DecisionError::EmptyKey(EntityKind::FeatureVariable))?;
            return Ok(None);
        }
        let Some(variable) = feature.variable(variable_key) else {
            self.decision_service
                .report(DecisionError::missing(EntityKind::FeatureVariable, variable_key))?;
            return Ok(None);
        };

        let decision =
            self.decision_service
                .get_variation_for_feature(&config, feature, user_id, attributes)?;

        let raw = match decision.variation {
            Some(variation) if decision.is_feature_enabled() => variation
                .variable_value(&variable.id)
                .unwrap_or(variable.default_value.as_str()),
            _ => variable.default_value.as_str(),
        };
        let value = variable.parse_value(raw);
        if value.is_none() {
            log::error!(target: "experiment_engine",
                feature_key = feature_key,
                variable_key = variable_key,
                raw_value = raw;
                "feature variable value does not match its declared type");
        }

        self.decision_listener
            .on_decision(DecisionNotification::for_feature_variable(
                feature,
                variable,
                value.as_ref(),
                &decision,
                user_id,
                attributes,
                Utc::now(),
            ));

        Ok(value)
    }

    /// Force the user into a variation of the experiment. `None` clears the override.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<bool> {
        let Some(config) = self.configuration("set_forced_variation") else {
            return Ok(false);
        };
        let Some(experiment) = self.experiment(&config, experiment_key)? else {
            return Ok(false);
        };
        self.decision_service
            .set_forced_variation(experiment, user_id, variation_key)
    }

    pub fn get_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
    ) -> Result<Option<String>> {
        let Some(config) = self.configuration("get_forced_variation") else {
            return Ok(None);
        };
        let Some(experiment) = self.experiment(&config, experiment_key)? else {
            return Ok(None);
        };
        Ok(self
            .decision_service
            .get_forced_variation(experiment, user_id)
            .map(|variation| variation.key.clone()))
    }

    fn decide_feature(
        &self,
        config: &ProjectConfig,
        feature: &FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<bool> {
        let decision =
            self.decision_service
                .get_variation_for_feature(config, feature, user_id, attributes)?;

        self.decision_listener
            .on_decision(DecisionNotification::for_feature(
                feature,
                &decision,
                user_id,
                attributes,
                Utc::now(),
            ));

        Ok(decision.is_feature_enabled())
    }

    fn configuration(&self, operation: &str) -> Option<Arc<ProjectConfig>> {
        let configuration = self.configuration_store.get_configuration();
        if configuration.is_none() {
            // Missing datafile is treated as a normal scenario.
            log::warn!(target: "experiment_engine",
                operation = operation;
                "called before a datafile has been set");
        }
        configuration
    }

    fn experiment<'c>(
        &self,
        config: &'c ProjectConfig,
        experiment_key: &str,
    ) -> Result<Option<&'c Experiment>> {
        if experiment_key.is_empty() {
            self.decision_service
                .report(DecisionError::EmptyKey(EntityKind::Experiment))?;
            return Ok(None);
        }
        let experiment = config.experiment_by_key(experiment_key);
        if experiment.is_none() {
            self.decision_service
                .report(DecisionError::missing(EntityKind::Experiment, experiment_key))?;
        }
        Ok(experiment)
    }

    fn feature_flag<'c>(
        &self,
        config: &'c ProjectConfig,
        feature_key: &str,
    ) -> Result<Option<&'c FeatureFlag>> {
        if feature_key.is_empty() {
            self.decision_service
                .report(DecisionError::EmptyKey(EntityKind::FeatureFlag))?;
            return Ok(None);
        }
        let feature = config.feature_flag(feature_key);
        if feature.is_none() {
            self.decision_service
                .report(DecisionError::missing(EntityKind::FeatureFlag, feature_key))?;
        }
        Ok(feature)
    }
}
