use std::sync::Arc;

use dashmap::DashMap;
use secrecy::SecretString;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Raw credential values typically passed from app-level config files.
#[derive(Clone, Debug)]
pub struct RawConfig {
    pub name: String,
    pub app_key: String,
    pub app_secret: SecretString,
    pub base_url: String,
}

/// Credentials and endpoint for one logical client (`"rest"`, `"oauth"`, ...).
///
/// Immutable once built; the secret never shows up in `Debug` output.
#[derive(Clone, Debug)]
pub struct Config {
    name: String,
    app_key: String,
    app_secret: SecretString,
    base_url: Url,
}

impl Config {
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let base_url = Url::parse(raw.base_url.trim()).map_err(|e| {
            Error::invalid_config(raw.name.as_str(), format!("invalid base_url: {e}"))
        })?;

        Self::new(raw.name, raw.app_key, raw.app_secret, base_url)
    }

    pub fn new(
        name: String,
        app_key: String,
        app_secret: SecretString,
        base_url: Url,
    ) -> Result<Self> {
        use secrecy::ExposeSecret as _;

        if name.trim().is_empty() {
            return Err(Error::invalid_config(name, "config name must not be empty"));
        }
        if app_key.trim().is_empty() {
            return Err(Error::invalid_config(name, "app_key must not be empty"));
        }
        if app_secret.expose_secret().is_empty() {
            return Err(Error::invalid_config(name, "app_secret must not be empty"));
        }
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(Error::invalid_config(
                name,
                format!("base_url must be an absolute http(s) url, got {base_url}"),
            ));
        }

        Ok(Self {
            name,
            app_key,
            app_secret,
            base_url,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    #[must_use]
    pub fn app_secret(&self) -> &SecretString {
        &self.app_secret
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins a request path onto the base url, keeping any base path prefix.
    pub(crate) fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(None);
        url
    }
}

/// Named configuration store owned by a client instance.
///
/// Populated at startup and read concurrently afterwards.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    configs: DashMap<String, Arc<Config>>,
}

impl ConfigRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `config` under its name, returning the entry it replaced.
    pub fn register(&self, config: Config) -> Option<Arc<Config>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(name = %config.name, base_url = %config.base_url, "registering config");

        self.configs.insert(config.name.clone(), Arc::new(config))
    }

    /// Looks up a configuration by name.
    ///
    /// A miss is a wiring error and is reported as [`crate::error::Kind::Config`].
    pub fn lookup(&self, name: &str) -> Result<Arc<Config>> {
        self.configs
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::config_not_found(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }
}
