use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};
use url::Url;

use crate::auth::live_oauth::DEFAULT_AUTHORITY_HOST;
use crate::auth::vso::{DEFAULT_IDENTITY_SERVICE, DEFAULT_TOKEN_SCOPE};
use crate::auth::BrokerSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub vso: VsoConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub helper: HelperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    #[serde(default = "default_authority_host")]
    pub host: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    #[serde(default = "default_login_hint")]
    pub login_hint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub open_browser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VsoConfig {
    #[serde(default = "default_identity_service")]
    pub identity_service: String,
    #[serde(default = "default_token_scope")]
    pub token_scope: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Request compact tokens by default
    #[serde(default)]
    pub compact: bool,
    /// Allow interactive login when no stored or refreshable credential exists
    #[serde(default = "default_true")]
    pub interactive: bool,
}

// Defaults
fn default_authority_host() -> String { DEFAULT_AUTHORITY_HOST.to_string() }
fn default_client_id() -> String { "872cd9fa-d31f-45e0-9eab-6e460a02d1f1".to_string() }
fn default_resource() -> String { "499b84ac-1321-427f-aa17-267ca6975798".to_string() }
fn default_redirect_url() -> String { "urn:ietf:wg:oauth:2.0:oob".to_string() }
fn default_login_hint() -> String { "domain_hint=live.com&display=popup".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_identity_service() -> String { DEFAULT_IDENTITY_SERVICE.to_string() }
fn default_token_scope() -> String { DEFAULT_TOKEN_SCOPE.to_string() }
fn default_backend() -> StoreBackend { StoreBackend::Keyring }
fn default_keyring_service() -> String { "credbroker".to_string() }
fn default_log_level() -> String { "warn".to_string() }

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            host: default_authority_host(),
            client_id: default_client_id(),
            resource: default_resource(),
            redirect_url: default_redirect_url(),
            login_hint: default_login_hint(),
            timeout_secs: default_timeout(),
            open_browser: true,
        }
    }
}

impl Default for VsoConfig {
    fn default() -> Self {
        Self {
            identity_service: default_identity_service(),
            token_scope: default_token_scope(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            keyring_service: default_keyring_service(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            compact: false,
            interactive: true,
        }
    }
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from file and environment. A missing file means defaults.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        match Self::locate() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `CREDBROKER_CONFIG`, else the first existing common location
    fn locate() -> Option<String> {
        if let Ok(path) = env::var("CREDBROKER_CONFIG") {
            return Some(path);
        }

        let home_config = format!(
            "{}/.config/credbroker/config.toml",
            env::var("HOME").unwrap_or_default()
        );
        let locations = [
            "./credbroker.toml",
            home_config.as_str(),
            "/etc/credbroker/config.toml",
        ];

        locations
            .iter()
            .find(|path| Path::new(path).exists())
            .map(|path| path.to_string())
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        // Validate config file permissions on Unix systems
        #[cfg(unix)]
        Self::validate_file_permissions(config_path)?;

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;

        Self::parse(&config_content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))
    }

    /// Parse TOML after `${VAR}` substitution, then validate
    pub fn parse(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content);
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Substitute ${VAR_NAME} with environment variable values.
    /// Substituted text is not scanned again.
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();
        let mut cursor = 0;

        while let Some(offset) = result[cursor..].find("${") {
            let start = cursor + offset;
            let Some(end) = result[start..].find('}') else {
                break;
            };
            let var_name = &result[start + 2..start + end];
            let value = env::var(var_name).unwrap_or_default();
            result.replace_range(start..start + end + 1, &value);
            cursor = start + value.len();
        }

        result
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.authority.host)
            .with_context(|| format!("authority.host is not a URL: {}", self.authority.host))?;
        Url::parse(&self.authority.redirect_url).with_context(|| {
            format!("authority.redirect_url is not a URL: {}", self.authority.redirect_url)
        })?;
        Url::parse(&self.vso.identity_service).with_context(|| {
            format!("vso.identity_service is not a URL: {}", self.vso.identity_service)
        })?;

        if self.authority.client_id.is_empty() || self.authority.resource.is_empty() {
            anyhow::bail!("authority.client_id and authority.resource must not be empty");
        }
        if self.authority.timeout_secs == 0 {
            tracing::warn!("authority.timeout_secs is 0 - requests will fail immediately");
        }

        Ok(())
    }

    /// Immutable values the broker hands to the identity authority
    pub fn broker_settings(&self) -> Result<BrokerSettings> {
        Ok(BrokerSettings {
            client_id: self.authority.client_id.clone(),
            resource: self.authority.resource.clone(),
            redirect_uri: Url::parse(&self.authority.redirect_url)
                .context("Invalid redirect URL")?,
            login_hint: self.authority.login_hint.clone(),
        })
    }

    /// Validate config file permissions (Unix only)
    #[cfg(unix)]
    fn validate_file_permissions(path: &str) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            tracing::debug!("Config file does not exist: {}", path);
            return Ok(());
        }

        let metadata = fs::metadata(path_obj)
            .with_context(|| format!("Failed to read metadata for config file: {}", path))?;

        let mode = metadata.permissions().mode();

        // Only the owner may write the file
        let group_writable = (mode & 0o020) != 0;
        let others_writable = (mode & 0o002) != 0;

        if group_writable || others_writable {
            anyhow::bail!(
                "Config file {} is writable by group or others (mode: {:o}). \
                This is a security risk. Run: chmod 600 {}",
                path,
                mode & 0o777,
                path
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.authority.host, "https://login.microsoftonline.com/live.com");
        assert_eq!(config.authority.login_hint, "domain_hint=live.com&display=popup");
        assert_eq!(config.store.backend, StoreBackend::Keyring);
        assert!(config.helper.interactive);

        let settings = config.broker_settings().unwrap();
        assert_eq!(settings.redirect_uri.as_str(), "urn:ietf:wg:oauth:2.0:oob");
    }

    #[test]
    fn test_env_var_substitution() {
        unsafe { env::set_var("CREDBROKER_TEST_CLIENT", "client-from-env") };

        let input = "[authority]\nclient_id = \"${CREDBROKER_TEST_CLIENT}\"";
        let output = Config::substitute_env_vars(input);

        assert_eq!(output, "[authority]\nclient_id = \"client-from-env\"");

        unsafe { env::remove_var("CREDBROKER_TEST_CLIENT") };
    }

    #[test]
    fn test_env_var_substitution_does_not_expand_values() {
        unsafe { env::set_var("CREDBROKER_TEST_SELF", "${CREDBROKER_TEST_SELF}") };
        unsafe { env::set_var("CREDBROKER_TEST_HINT", "domain_hint=live.com") };

        let input = "a = \"${CREDBROKER_TEST_SELF}\"\nb = \"${CREDBROKER_TEST_HINT}\"\nc = \"${CREDBROKER_TEST_UNSET}\"";
        let output = Config::substitute_env_vars(input);

        assert_eq!(
            output,
            "a = \"${CREDBROKER_TEST_SELF}\"\nb = \"domain_hint=live.com\"\nc = \"\""
        );

        unsafe { env::remove_var("CREDBROKER_TEST_SELF") };
        unsafe { env::remove_var("CREDBROKER_TEST_HINT") };
    }

    #[test]
    fn test_env_var_substitution_unterminated() {
        assert_eq!(Config::substitute_env_vars("x = \"${OPEN\""), "x = \"${OPEN\"");
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            [store]
            backend = "memory"

            [helper]
            compact = true
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.helper.compact);
        assert_eq!(config.vso.identity_service, "https://app.vssps.visualstudio.com");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        let err = Config::parse("[authority]\nhost = \"not a url\"").unwrap_err();
        assert!(err.to_string().contains("authority.host"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_from_rejects_world_writable_file() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
