use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{Experiment, Variation},
    lru_cache::{LruCache, DEFAULT_CAPACITY},
};

/// Error type returned by user profile services. Never propagated to decision callers.
pub type UserProfileServiceError = Box<dyn std::error::Error + Send + Sync>;

/// Persisted record of the variation a user was bucketed into, per experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Experiment id to stored decision.
    #[serde(default)]
    pub experiment_bucket_map: HashMap<String, StoredDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDecision {
    pub variation_id: String,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserProfile {
            user_id: user_id.into(),
            experiment_bucket_map: HashMap::new(),
        }
    }

    pub fn variation_id(&self, experiment_id: &str) -> Option<&str> {
        self.experiment_bucket_map
            .get(experiment_id)
            .map(|decision| decision.variation_id.as_str())
    }
}

/// External store making decisions sticky across config changes.
pub trait UserProfileService {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError>;
    fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError>;
}

impl<T: UserProfileService + ?Sized> UserProfileService for Arc<T> {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError> {
        (**self).lookup(user_id)
    }

    fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError> {
        (**self).save(profile)
    }
}

/// Process-local profile service backed by a bounded LRU cache.
#[derive(Debug)]
pub struct InMemoryUserProfileService {
    profiles: Mutex<LruCache<String, UserProfile>>,
}

impl Default for InMemoryUserProfileService {
    fn default() -> Self {
        InMemoryUserProfileService::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryUserProfileService {
    pub fn new(capacity: usize) -> Self {
        InMemoryUserProfileService {
            profiles: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_cache(cache: LruCache<String, UserProfile>) -> Self {
        InMemoryUserProfileService {
            profiles: Mutex::new(cache),
        }
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError> {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| "user profile cache lock is poisoned")?;
        Ok(profiles.get(user_id).cloned())
    }

    fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError> {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| "user profile cache lock is poisoned")?;
        profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}

/// Loads a user's profile at most once per top-level decision, collects updates, and saves
/// only if something changed. Service failures are logged and otherwise ignored.
pub(crate) struct UserProfileTracker<'a> {
    service: &'a (dyn UserProfileService + Send + Sync),
    user_id: &'a str,
    profile: Option<UserProfile>,
    updated: bool,
}

impl<'a> UserProfileTracker<'a> {
    pub fn new(service: &'a (dyn UserProfileService + Send + Sync), user_id: &'a str) -> Self {
        UserProfileTracker {
            service,
            user_id,
            profile: None,
            updated: false,
        }
    }

    fn profile(&mut self) -> &mut UserProfile {
        let service = self.service;
        let user_id = self.user_id;
        self.profile.get_or_insert_with(|| {
            match service.lookup(user_id) {
                Ok(Some(profile)) => profile,
                Ok(None) => {
                    log::info!(target: "experiment_engine",
                        user_id = user_id;
                        "user profile not found, starting a new one");
                    UserProfile::new(user_id)
                }
                Err(err) => {
                    log::warn!(target: "experiment_engine",
                        user_id = user_id;
                        "failed to look up user profile: {err}");
                    UserProfile::new(user_id)
                }
            }
        })
    }

    /// Previously stored variation for the experiment, if it still exists in the experiment.
    pub fn stored_variation<'e>(&mut self, experiment: &'e Experiment) -> Option<&'e Variation> {
        let user_id = self.user_id;
        let variation_id = self.profile().variation_id(&experiment.id)?;
        match experiment.variation_by_id(variation_id) {
            Some(variation) => {
                log::info!(target: "experiment_engine",
                    user_id = user_id,
                    experiment_key:display = experiment.key,
                    variation_key:display = variation.key;
                    "returning previously activated variation from user profile");
                Some(variation)
            }
            None => {
                log::info!(target: "experiment_engine",
                    user_id = user_id,
                    experiment_key:display = experiment.key,
                    variation_id = variation_id;
                    "stored variation is no longer in the experiment, ignoring user profile");
                None
            }
        }
    }

    pub fn update(&mut self, experiment: &Experiment, variation: &Variation) {
        let profile = self.profile();
        if profile.variation_id(&experiment.id) == Some(variation.id.as_str()) {
            return;
        }
        profile.experiment_bucket_map.insert(
            experiment.id.clone(),
            StoredDecision {
                variation_id: variation.id.clone(),
            },
        );
        self.updated = true;
        log::info!(target: "experiment_engine",
            user_id = self.user_id,
            experiment_key:display = experiment.key,
            variation_key:display = variation.key;
            "updated variation in user profile");
    }

    pub fn save(self) {
        if !self.updated {
            return;
        }
        let Some(profile) = self.profile else {
            return;
        };
        let user_id = self.user_id;
        match self.service.save(&profile) {
            Ok(()) => {
                log::info!(target: "experiment_engine", user_id = user_id; "saved user profile");
            }
            Err(err) => {
                log::warn!(target: "experiment_engine",
                    user_id = user_id;
                    "failed to save user profile: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::{
        InMemoryUserProfileService, StoredDecision, UserProfile, UserProfileService,
        UserProfileServiceError, UserProfileTracker,
    };
    use crate::test_support::test_config;

    #[derive(Default)]
    struct CountingService {
        stored: Mutex<Option<UserProfile>>,
        lookups: AtomicUsize,
        saves: AtomicUsize,
    }

    impl UserProfileService for CountingService {
        fn lookup(&self, _user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.stored.lock().unwrap().clone())
        }

        fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.stored.lock().unwrap() = Some(profile.clone());
            Ok(())
        }
    }

    #[test]
    fn profile_serializes_with_snake_case_keys() {
        let mut profile = UserProfile::new("user-1");
        profile.experiment_bucket_map.insert(
            "10001".to_owned(),
            StoredDecision {
                variation_id: "20001".to_owned(),
            },
        );
        assert_eq!(
            serde_json::to_value(&profile).unwrap(),
            serde_json::json!({
                "user_id": "user-1",
                "experiment_bucket_map": { "10001": { "variation_id": "20001" } }
            })
        );
    }

    #[test]
    fn tracker_loads_once_and_saves_only_changes() {
        let config = test_config();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();
        let control = experiment.variation_by_key("control").unwrap();
        let service = CountingService::default();

        let mut tracker = UserProfileTracker::new(&service, "user-1");
        assert!(tracker.stored_variation(experiment).is_none());
        tracker.update(experiment, control);
        tracker.save();
        assert_eq!(service.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(service.saves.load(Ordering::SeqCst), 1);

        let mut tracker = UserProfileTracker::new(&service, "user-1");
        assert_eq!(tracker.stored_variation(experiment), Some(control));
        tracker.update(experiment, control);
        tracker.save();
        assert_eq!(service.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(service.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tracker_ignores_stale_variation() {
        let config = test_config();
        let experiment = config.experiment_by_key("basic_experiment").unwrap();
        let service = CountingService::default();
        let mut profile = UserProfile::new("user-1");
        profile.experiment_bucket_map.insert(
            experiment.id.clone(),
            StoredDecision {
                variation_id: "deleted".to_owned(),
            },
        );
        *service.stored.lock().unwrap() = Some(profile);

        let mut tracker = UserProfileTracker::new(&service, "user-1");
        assert!(tracker.stored_variation(experiment).is_none());
    }

    #[test]
    fn in_memory_service_round_trip() {
        let service = InMemoryUserProfileService::new(10);
        assert_eq!(service.lookup("user-1").unwrap(), None);
        let profile = UserProfile::new("user-1");
        service.save(&profile).unwrap();
        assert_eq!(service.lookup("user-1").unwrap(), Some(profile));
    }
}
