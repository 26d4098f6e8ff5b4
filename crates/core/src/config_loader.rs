use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use crate::config::GovernorConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads governor configuration by merging the TOML file with
    /// `POSGUARD_`-prefixed environment overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration fails validation.
    pub fn load() -> Result<GovernorConfig> {
        Self::load_from("config/Posguard.toml")
    }

    /// Loads from a specific TOML path. Missing files fall back to defaults,
    /// still subject to environment overrides and validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or validation fails.
    pub fn load_from(path: impl AsRef<Path>) -> Result<GovernorConfig> {
        let config: GovernorConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("POSGUARD_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }
}
