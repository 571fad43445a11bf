use std::time::Duration;

use flagsmith::{ClientConfig, DefaultFlag, Traits};

pub fn main() -> flagsmith::Result<()> {
    env_logger::init();

    let environment_key = std::env::var("FLAGSMITH_ENVIRONMENT_KEY").unwrap();

    let mut config = ClientConfig::from_environment_key(environment_key);
    config
        .enable_analytics(true)
        .request_timeout(Duration::from_secs(5))
        // Used when the API can't be reached or the feature doesn't exist.
        .default_flag_handler(|_feature_name: &str| DefaultFlag {
            enabled: false,
            value: "default".into(),
        });
    let client = config.to_client()?;

    let flags = client.get_environment_flags()?;
    println!("Environment flags: {:?}", flags.all_flags());

    let traits = Traits::from([("plan".to_owned(), "enterprise".into())]);
    let identity_flags = client.get_identity_flags("test-identity", &traits)?;
    println!(
        "secret_button enabled: {:?}",
        identity_flags.is_feature_enabled("secret_button")
    );

    // Send pending analytics before exiting.
    client.shutdown()
}
