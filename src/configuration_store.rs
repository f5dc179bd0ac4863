use std::sync::{Arc, PoisonError, RwLock};

use crate::config::ProjectConfig;

/// Shared slot for the active datafile.
///
/// Decisions run against an `Arc` snapshot taken once per call, so a datafile swapped in by
/// another thread never changes a decision already in flight. A `None` slot means no datafile has
/// been activated yet.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    active: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the active datafile.
    pub fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        // The slot only ever holds a complete `Arc`, so a poisoned lock still guards a valid
        // value.
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Revision of the active datafile, if any.
    pub fn revision(&self) -> Option<String> {
        self.get_configuration()
            .map(|config| config.revision().to_owned())
    }

    /// Activate `config` and return the datafile it replaced.
    pub fn set_configuration(&self, config: ProjectConfig) -> Option<Arc<ProjectConfig>> {
        let incoming = Arc::new(config);
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            active.replace(incoming.clone())
        };

        log::info!(target: "experiment_engine",
            revision = incoming.revision(),
            previous_revision = previous.as_ref().map(|config| config.revision());
            "activated datafile");
        previous
    }
}
