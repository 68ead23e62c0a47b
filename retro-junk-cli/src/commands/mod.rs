pub(crate) mod config;
pub(crate) mod scrape;
pub(crate) mod task_log;

use std::path::Path;

use retro_junk_scraper::OrchestratorConfig;

use crate::error::CliError;

/// Load configuration from `--config` if given, else the default location.
/// Environment overrides apply either way.
pub(crate) fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig, CliError> {
    match path {
        Some(path) => {
            let mut config = OrchestratorConfig::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(OrchestratorConfig::load()?),
    }
}
