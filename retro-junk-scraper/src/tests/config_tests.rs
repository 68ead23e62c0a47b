use std::collections::HashMap;

use super::*;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = OrchestratorConfig::default();
    assert_eq!(config.max_concurrent_tasks, 2);
    assert!(config.validate().is_ok());

    let ss = config.provider(ProviderId::ScreenScraper);
    assert_eq!(ss.requests_per_second, Some(4.0));
    assert_eq!(ss.max_concurrent, Some(8));
    assert_eq!(ss.batch_size, 10);

    let tgdb = config.provider(ProviderId::TheGamesDb);
    assert_eq!(tgdb.requests_per_second, Some(1.0));
    assert_eq!(tgdb.max_concurrent, Some(2));

    let local = config.provider(ProviderId::BulkLocal);
    assert_eq!(local.requests_per_second, None);
    assert_eq!(local.batch_size, 16);

    let retry = ss.retry_policy();
    assert_eq!(retry.max_retries, 3);
    assert_eq!(retry.backoff_factor, 2.0);
    assert_eq!(retry.max_delay, Duration::from_secs(60));
    assert_eq!(ss.call_timeout(), Duration::from_secs(60));
}

#[test]
fn test_partial_table_overlays_provider_defaults() {
    let config = OrchestratorConfig::from_toml_str(
        r#"
        max_concurrent_tasks = 3

        [providers.screenscraper]
        batch_size = 5
        region = "eu"

        [providers.thegamesdb]
        requests_per_second = 0
        max_concurrent = 0
        "#,
    )
    .unwrap();

    assert_eq!(config.max_concurrent_tasks, 3);
    assert_eq!(config.screenscraper.batch_size, 5);
    assert_eq!(config.screenscraper.region, "eu");
    // untouched fields keep the provider's own defaults
    assert_eq!(config.screenscraper.requests_per_second, Some(4.0));
    assert_eq!(config.screenscraper.max_concurrent, Some(8));
    assert_eq!(config.thegamesdb.requests_per_second, None);
    assert_eq!(config.thegamesdb.max_concurrent, None);
    assert_eq!(config.local, ProviderSettings::for_provider(ProviderId::BulkLocal));
}

#[test]
fn test_invalid_values_rejected() {
    assert!(matches!(
        OrchestratorConfig::from_toml_str("max_concurrent_tasks = 0"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        OrchestratorConfig::from_toml_str("[providers.local]\nbatch_size = 0"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        OrchestratorConfig::from_toml_str("[providers.screenscraper]\nrequests_per_second = 1e-20"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(
        OrchestratorConfig::from_toml_str("[providers.screenscraper]\nrequests_per_second = 0.001")
            .is_ok()
    );
    assert!(matches!(
        OrchestratorConfig::from_toml_str("[providers.local]\nbacth_size = 3"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        OrchestratorConfig::from_toml_str("max_concurrent_tasks = \"two\""),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_credentials_from_file_require_dev_pair() {
    let config = OrchestratorConfig::from_toml_str(
        r#"
        [credentials.screenscraper]
        dev_id = "dev"

        [credentials.thegamesdb]
        api_key = "  "
        "#,
    )
    .unwrap();
    assert!(config.credentials.screenscraper.is_none());
    assert!(config.credentials.thegamesdb_api_key.is_none());

    let config = OrchestratorConfig::from_toml_str(
        r#"
        [credentials.screenscraper]
        dev_id = "dev"
        dev_password = "secret"
        user_id = "me"
        "#,
    )
    .unwrap();
    let ss = config.credentials.screenscraper.unwrap();
    assert_eq!(ss.dev_id, "dev");
    assert_eq!(ss.soft_name, "retro-junk");
    assert_eq!(ss.user_id.as_deref(), Some("me"));
}

#[test]
fn test_env_overrides_file() {
    let mut config = OrchestratorConfig::from_toml_str(
        r#"
        [credentials.screenscraper]
        dev_id = "file-dev"
        dev_password = "file-pw"
        user_id = "file-user"
        "#,
    )
    .unwrap();
    config
        .apply_env(env(&[
            ("SCREENSCRAPER_DEVID", "env-dev"),
            ("THEGAMESDB_APIKEY", "key"),
            ("RETRO_JUNK_MAX_TASKS", "4"),
        ]))
        .unwrap();

    let ss = config.credentials.screenscraper.as_ref().unwrap();
    assert_eq!(ss.dev_id, "env-dev");
    assert_eq!(ss.dev_password, "file-pw");
    assert_eq!(ss.user_id.as_deref(), Some("file-user"));
    assert_eq!(config.credentials.thegamesdb_api_key.as_deref(), Some("key"));
    assert_eq!(config.max_concurrent_tasks, 4);

    let mut config = OrchestratorConfig::default();
    assert!(config.apply_env(env(&[("RETRO_JUNK_MAX_TASKS", "lots")])).is_err());
}

#[test]
fn test_env_only_credentials() {
    let mut config = OrchestratorConfig::default();
    config
        .apply_env(env(&[
            ("SCREENSCRAPER_DEVID", "d"),
            ("SCREENSCRAPER_DEVPASSWORD", "p"),
            ("SCREENSCRAPER_SOFTNAME", "my-tool"),
        ]))
        .unwrap();
    let ss = config.credentials.screenscraper.unwrap();
    assert_eq!(ss.soft_name, "my-tool");
    assert!(ss.user_password.is_none());
}

#[test]
fn test_to_toml_masks_secrets() {
    let mut config = OrchestratorConfig::default();
    config.credentials.screenscraper = Some(ScreenScraperCredentials {
        dev_id: "dev".to_string(),
        dev_password: "hunter2".to_string(),
        ..ScreenScraperCredentials::default()
    });
    config.credentials.thegamesdb_api_key = Some("abcdef".to_string());

    let shown = config.to_toml_string().unwrap();
    assert!(shown.contains("max_concurrent_tasks = 2"));
    assert!(shown.contains("[providers.screenscraper]"));
    assert!(!shown.contains("hunter2"));
    assert!(!shown.contains("abcdef"));
}

#[test]
fn test_limiter_from_settings() {
    let settings = ProviderSettings::for_provider(ProviderId::TheGamesDb);
    let limiter = settings.limiter(ProviderId::TheGamesDb);
    assert_eq!(limiter.max_concurrent(), Some(2));
    assert_eq!(limiter.available_slots(), 2);
}

#[test]
fn test_artwork_section() {
    let config = OrchestratorConfig::from_toml_str(
        r#"
[artwork]
command = "magick"
args = ["{covers}", "{output}"]
"#,
    )
    .unwrap();
    let artwork = config.artwork.unwrap();
    assert_eq!(artwork.command, "magick");
    assert_eq!(artwork.args, vec!["{covers}", "{output}"]);

    assert!(OrchestratorConfig::from_toml_str("[artwork]\ncommand = \" \"\n").is_err());
    assert!(OrchestratorConfig::default().artwork.is_none());
}
