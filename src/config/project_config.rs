use std::collections::HashMap;

use super::models::{
    Audience, DatafileWire, Experiment, FeatureFlag, Group, GroupWire, Rollout,
    TrafficAllocation, TryParse,
};
use crate::{sharder::MAX_TRAFFIC_VALUE, Error, Result};

/// Datafile versions this crate understands.
pub const SUPPORTED_DATAFILE_VERSIONS: &[&str] = &["2", "3", "4"];

/// Immutable, indexed snapshot of a datafile.
///
/// Decisions are always made against a single snapshot, so a concurrent config update never
/// produces a half-old, half-new decision.
#[derive(Debug)]
pub struct ProjectConfig {
    version: String,
    project_id: String,
    account_id: String,
    revision: String,
    /// All experiments by id, including group members. Rollout rules are not included.
    experiments: HashMap<String, Experiment>,
    experiment_key_to_id: HashMap<String, String>,
    groups: HashMap<String, Group>,
    audiences: HashMap<String, Audience>,
    /// Feature flags by key.
    feature_flags: HashMap<String, FeatureFlag>,
    rollouts: HashMap<String, Rollout>,
}

impl ProjectConfig {
    /// Parse and index a JSON datafile.
    ///
    /// Audiences whose conditions can't be parsed are dropped with a warning, so any reference to
    /// them evaluates to unknown. A malformed datafile as a whole is an error.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let wire: DatafileWire = serde_json::from_slice(json).map_err(|err| {
            log::warn!(target: "experiment_engine", "failed to parse datafile: {err:?}");
            Error::from(err)
        })?;

        if !SUPPORTED_DATAFILE_VERSIONS.contains(&wire.version.as_str()) {
            log::warn!(target: "experiment_engine",
                version:display = wire.version;
                "datafile version is not supported");
            return Err(Error::UnsupportedDatafileVersion(wire.version));
        }

        Ok(compile_project_config(wire))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn experiment(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    pub fn experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_key_to_id
            .get(key)
            .and_then(|id| self.experiments.get(id))
    }

    /// Id of the experiment with the given key.
    pub fn experiment_id(&self, key: &str) -> Option<&str> {
        self.experiment_key_to_id.get(key).map(String::as_str)
    }

    pub fn experiments(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.values()
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn audience(&self, id: &str) -> Option<&Audience> {
        self.audiences.get(id)
    }

    pub fn feature_flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.feature_flags.get(key)
    }

    pub fn feature_flags(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.feature_flags.values()
    }

    pub fn rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }
}

fn compile_project_config(wire: DatafileWire) -> ProjectConfig {
    let mut experiments = HashMap::new();
    let mut groups = HashMap::new();

    for experiment in wire.experiments {
        experiments.insert(experiment.id.clone(), experiment);
    }
    for group in wire.groups {
        let (group, members) = compile_group(group);
        for experiment in members {
            experiments.insert(experiment.id.clone(), experiment);
        }
        groups.insert(group.id.clone(), group);
    }

    let experiment_key_to_id = experiments
        .values()
        .map(|experiment| (experiment.key.clone(), experiment.id.clone()))
        .collect();

    for experiment in experiments.values() {
        validate_traffic_allocation(&experiment.key, &experiment.traffic_allocation);
    }

    let rollouts: HashMap<String, Rollout> = wire
        .rollouts
        .into_iter()
        .map(|rollout| (rollout.id.clone(), rollout))
        .collect();
    for rule in rollouts.values().flat_map(|rollout| &rollout.experiments) {
        validate_traffic_allocation(&rule.key, &rule.traffic_allocation);
    }

    // Typed audiences override legacy audiences with the same id.
    let mut audiences = HashMap::new();
    for audience in wire.audiences.into_iter().chain(wire.typed_audiences) {
        match audience {
            TryParse::Parsed(audience) => {
                audiences.insert(audience.id.clone(), audience);
            }
            TryParse::ParseFailed(value) => {
                let audience_id = value.get("id").and_then(|id| id.as_str()).unwrap_or("");
                log::warn!(target: "experiment_engine",
                    audience_id = audience_id;
                    "failed to parse audience, references to it will evaluate to unknown");
            }
        }
    }

    let feature_flags = wire
        .feature_flags
        .into_iter()
        .map(|feature| (feature.key.clone(), feature))
        .collect();

    ProjectConfig {
        version: wire.version,
        project_id: wire.project_id,
        account_id: wire.account_id,
        revision: wire.revision,
        experiments,
        experiment_key_to_id,
        groups,
        audiences,
        feature_flags,
        rollouts,
    }
}

fn compile_group(group: GroupWire) -> (Group, Vec<Experiment>) {
    validate_traffic_allocation(&group.id, &group.traffic_allocation);

    let members: Vec<Experiment> = group
        .experiments
        .into_iter()
        .map(|mut experiment| {
            experiment.group_id = Some(group.id.clone());
            experiment
        })
        .collect();

    let compiled = Group {
        experiment_ids: members.iter().map(|e| e.id.clone()).collect(),
        id: group.id,
        policy: group.policy,
        traffic_allocation: group.traffic_allocation,
    };
    (compiled, members)
}

/// Ranges must be non-decreasing and stay within the bucket space. Violations are only logged:
/// the allocation walk still returns a deterministic answer for them.
fn validate_traffic_allocation(owner: &str, allocation: &[TrafficAllocation]) {
    let mut previous = 0;
    for entry in allocation {
        if entry.end_of_range < previous || entry.end_of_range > MAX_TRAFFIC_VALUE {
            log::warn!(target: "experiment_engine",
                owner = owner,
                entity_id:display = entry.entity_id,
                end_of_range = entry.end_of_range;
                "traffic allocation ranges are not increasing or exceed the bucket space");
            return;
        }
        previous = entry.end_of_range;
    }
}
