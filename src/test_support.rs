use crate::config::ProjectConfig;

pub(crate) const DATAFILE_PATH: &str = "tests/data/datafile.json";

pub(crate) fn test_config() -> ProjectConfig {
    let json = std::fs::read(DATAFILE_PATH).unwrap();
    ProjectConfig::from_json(&json).unwrap()
}

/// Load the test datafile, let `edit` modify its JSON, and compile the result.
pub(crate) fn edited_config(edit: impl FnOnce(&mut serde_json::Value)) -> ProjectConfig {
    let json = std::fs::read(DATAFILE_PATH).unwrap();
    let mut value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    edit(&mut value);
    ProjectConfig::from_json(&serde_json::to_vec(&value).unwrap()).unwrap()
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
