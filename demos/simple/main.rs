use experiment_engine::{AttributeValue, Attributes, ClientConfig, DecisionNotification};

pub fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/data/datafile.json".to_owned());
    let datafile = std::fs::read(&path).unwrap();

    let mut config = ClientConfig::new();
    config.decision_listener(|notification: DecisionNotification| {
        println!("Decision: {}", serde_json::to_string(&notification).unwrap());
    });
    let client = config.to_client();
    client.set_datafile(&datafile).unwrap();

    let attributes: Attributes = [("browser_type".to_owned(), AttributeValue::from("chrome"))]
        .into_iter()
        .collect();

    // Get variation for test-subject.
    let variation = client
        .get_variation("basic_experiment", "test-subject", &attributes)
        .unwrap();
    println!("Variation: {:?}", variation);

    let enabled = client
        .is_feature_enabled("rollout_feature", "test-subject", &attributes)
        // default value
        .unwrap_or(false);
    println!("Feature enabled: {:?}", enabled);
}
