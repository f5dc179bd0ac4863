use dashmap::DashMap;

/// Runtime overrides: (experiment id, user id) to variation id.
///
/// Process-local and not persisted. Safe to read and write from many threads at once.
#[derive(Debug, Default)]
pub struct ForcedVariationStore {
    variations: DashMap<(String, String), String>,
}

impl ForcedVariationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or, with `None`, clear the forced variation. Returns the previous variation id.
    pub fn set(
        &self,
        experiment_id: &str,
        user_id: &str,
        variation_id: Option<&str>,
    ) -> Option<String> {
        let key = (experiment_id.to_owned(), user_id.to_owned());
        match variation_id {
            Some(variation_id) => self.variations.insert(key, variation_id.to_owned()),
            None => self.variations.remove(&key).map(|(_, previous)| previous),
        }
    }

    pub fn get(&self, experiment_id: &str, user_id: &str) -> Option<String> {
        self.variations
            .get(&(experiment_id.to_owned(), user_id.to_owned()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.variations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variations.is_empty()
    }
}
