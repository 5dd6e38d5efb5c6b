//! Configuration for the tnsync CLI.
//!
//! TOML profiles, the legacy flat environment variables, credential
//! resolution (env + keyring + plaintext), and translation to
//! `tnsync_core::MiddlewareConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tnsync_core::config::DEFAULT_URI;
use tnsync_core::{AuthCredentials, MiddlewareConfig, TransportMethod};

/// Keyring service name for stored secrets.
const KEYRING_SERVICE: &str = "tnsync";

/// Environment variables read on top of the config file, for
/// compatibility with existing playbooks.
pub const ENV_METHOD: &str = "middleware_method";
pub const ENV_URI: &str = "TRUENAS_URI";
pub const ENV_API_KEY: &str = "TRUENAS_API_KEY";
pub const ENV_USERNAME: &str = "TRUENAS_API_USERNAME";
pub const ENV_PASSWORD: &str = "TRUENAS_API_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for user '{username}' in profile '{profile}'")]
    NoCredentials { profile: String, username: String },

    #[error("profile '{name}' not found (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Named middleware profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            profiles: HashMap::new(),
        }
    }
}

/// How to reach one appliance's middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// `midclt`, `websocket` or `client`.
    pub method: Option<String>,

    /// Websocket endpoint (e.g. "wss://nas.lan/api/current").
    pub uri: Option<String>,

    /// API key (plaintext; prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,

    pub username: Option<String>,

    /// Password (plaintext; prefer keyring).
    pub password: Option<String>,

    /// Path of the `midclt` binary.
    pub midclt: Option<PathBuf>,

    /// Job status poll interval in milliseconds.
    pub job_poll_interval_ms: Option<u64>,
}

impl Profile {
    /// Overlay the legacy flat environment variables. Secrets are not
    /// copied here; they are looked up during credential resolution.
    pub fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        let set = |slot: &mut Option<String>, key: &str| {
            if let Some(value) = non_empty(env, key) {
                debug!(variable = key, "override from environment");
                *slot = Some(value);
            }
        };
        set(&mut self.method, ENV_METHOD);
        set(&mut self.uri, ENV_URI);
        set(&mut self.username, ENV_USERNAME);
    }

    pub fn job_poll_interval(&self) -> Duration {
        self.job_poll_interval_ms.map_or_else(
            || MiddlewareConfig::default().job_poll_interval,
            Duration::from_millis,
        )
    }
}

fn non_empty(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key).filter(|v| !v.is_empty())
}

/// The process environment, as a lookup function.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "tnsync", "tnsync").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("tnsync");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the default path + `TNSYNC_` environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`; a missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TNSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

impl Config {
    /// Pick a profile: the named one, else `default_profile`, else an
    /// empty profile (local midclt).
    pub fn select(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        if let Some(name) = name {
            return self
                .profiles
                .get(name)
                .map(|p| (name.to_owned(), p.clone()))
                .ok_or_else(|| ConfigError::UnknownProfile {
                    name: name.to_owned(),
                    available: self.available(),
                });
        }
        let name = self.default_profile.clone().unwrap_or_else(|| "default".into());
        let profile = self.profiles.get(&name).cloned().unwrap_or_default();
        Ok((name, profile))
    }

    fn available(&self) -> String {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        if names.is_empty() {
            "none".into()
        } else {
            names.join(", ")
        }
    }
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_secret(profile_name: &str, kind: &str) -> Option<SecretString> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{kind}")).ok()?;
    entry.get_password().ok().map(SecretString::from)
}

/// API key: the profile's `api_key_env` variable, `TRUENAS_API_KEY`, the
/// keyring, then plaintext config.
pub fn resolve_api_key(
    profile: &Profile,
    profile_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    let from_env = profile
        .api_key_env
        .as_deref()
        .and_then(|name| non_empty(env, name))
        .or_else(|| non_empty(env, ENV_API_KEY));
    if let Some(value) = from_env {
        return Some(SecretString::from(value));
    }
    if let Some(secret) = keyring_secret(profile_name, "api-key") {
        return Some(secret);
    }
    profile.api_key.clone().map(SecretString::from)
}

/// Password: `TRUENAS_API_PASSWORD`, the keyring, then plaintext config.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    if let Some(pw) = non_empty(env, ENV_PASSWORD) {
        return Ok(SecretString::from(pw));
    }
    if let Some(secret) = keyring_secret(profile_name, "password") {
        return Ok(secret);
    }
    profile
        .password
        .clone()
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.to_owned(),
            username: profile.username.clone().unwrap_or_default(),
        })
}

/// Websocket login: API key if any, else username + password, else none.
pub fn resolve_auth(
    profile: &Profile,
    profile_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<AuthCredentials, ConfigError> {
    if let Some(key) = resolve_api_key(profile, profile_name, env) {
        return Ok(AuthCredentials::ApiKey(key));
    }
    match &profile.username {
        Some(username) => Ok(AuthCredentials::Password {
            username: username.clone(),
            password: resolve_password(profile, profile_name, env)?,
        }),
        None => Ok(AuthCredentials::None),
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `MiddlewareConfig` from a profile with env overrides applied.
pub fn to_middleware_config(
    profile: &Profile,
    profile_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<MiddlewareConfig, ConfigError> {
    let method = match profile.method.as_deref() {
        Some(m) => TransportMethod::parse(m).map_err(|e| ConfigError::Validation {
            field: "method".into(),
            reason: e.to_string(),
        })?,
        None => TransportMethod::default(),
    };

    let uri_str = profile.uri.as_deref().unwrap_or(DEFAULT_URI);
    let uri: url::Url = uri_str.parse().map_err(|_| ConfigError::Validation {
        field: "uri".into(),
        reason: format!("invalid URL: {uri_str}"),
    })?;

    // midclt talks to the local daemon as root; credentials are unused.
    let auth = match method {
        TransportMethod::Midclt => AuthCredentials::None,
        TransportMethod::Websocket => resolve_auth(profile, profile_name, env)?,
    };

    let defaults = MiddlewareConfig::default();
    Ok(MiddlewareConfig {
        method,
        uri,
        auth,
        midclt_program: profile.midclt.clone().unwrap_or(defaults.midclt_program),
        job_poll_interval: profile.job_poll_interval(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let cfg = load_config_from(&dir.path().join("nope.toml")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        let (name, profile) = cfg.select(None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(name, "default");
        assert_eq!(profile, Profile::default());
    }

    #[test]
    fn profiles_load_from_toml() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap_or_else(|e| panic!("{e}"));
        file.write_all(
            b"default_profile = \"nas\"\n\n[profiles.nas]\nmethod = \"websocket\"\n\
              uri = \"wss://nas.lan/api/current\"\njob_poll_interval_ms = 250\n",
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let cfg = load_config_from(&path).unwrap_or_else(|e| panic!("{e}"));
        let (name, profile) = cfg.select(None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(name, "nas");
        assert_eq!(profile.uri.as_deref(), Some("wss://nas.lan/api/current"));
        assert_eq!(profile.job_poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_named_profile_is_an_error() {
        let err = Config::default().select(Some("lab"));
        assert!(matches!(err, Err(ConfigError::UnknownProfile { ref name, .. }) if name == "lab"));
    }

    #[test]
    fn empty_profile_is_local_midclt() {
        let cfg = to_middleware_config(&Profile::default(), "default", &env_of(&[]))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cfg.method, TransportMethod::Midclt);
        assert_eq!(cfg.uri.as_str(), "ws://127.0.0.1:6000/");
        assert!(matches!(cfg.auth, AuthCredentials::None));
    }

    #[test]
    fn legacy_env_selects_client_with_api_key() {
        let env = env_of(&[
            (ENV_METHOD, "client"),
            (ENV_URI, "wss://nas.lan/websocket"),
            (ENV_API_KEY, "1-abc"),
        ]);
        let mut profile = Profile::default();
        profile.apply_env(&env);
        let cfg = to_middleware_config(&profile, "default", &env).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(cfg.method, TransportMethod::Websocket);
        assert_eq!(cfg.uri.as_str(), "wss://nas.lan/websocket");
        match cfg.auth {
            AuthCredentials::ApiKey(key) => assert_eq!(key.expose_secret(), "1-abc"),
            other => panic!("expected an API key, got {other:?}"),
        }
    }

    #[test]
    fn username_and_password_from_env() {
        let env = env_of(&[
            (ENV_METHOD, "websocket"),
            (ENV_USERNAME, "admin"),
            (ENV_PASSWORD, "hunter2"),
        ]);
        let mut profile = Profile::default();
        profile.apply_env(&env);
        let cfg = to_middleware_config(&profile, "default", &env).unwrap_or_else(|e| panic!("{e}"));
        match cfg.auth {
            AuthCredentials::Password { username, password } => {
                assert_eq!(username, "admin");
                assert_eq!(password.expose_secret(), "hunter2");
            }
            other => panic!("expected a password login, got {other:?}"),
        }
    }

    #[test]
    fn api_key_env_indirection() {
        let env = env_of(&[("NAS_KEY", "2-def")]);
        let profile = Profile {
            method: Some("websocket".into()),
            api_key_env: Some("NAS_KEY".into()),
            ..Profile::default()
        };
        let key = resolve_api_key(&profile, "nas", &env).map(|k| k.expose_secret().to_owned());
        assert_eq!(key.as_deref(), Some("2-def"));
    }

    #[test]
    fn bad_method_and_uri_are_rejected() {
        let env = env_of(&[]);
        let bad_method = Profile {
            method: Some("rest".into()),
            ..Profile::default()
        };
        assert!(matches!(
            to_middleware_config(&bad_method, "default", &env),
            Err(ConfigError::Validation { ref field, .. }) if field == "method"
        ));
        let bad_uri = Profile {
            uri: Some("not a url".into()),
            ..Profile::default()
        };
        assert!(matches!(
            to_middleware_config(&bad_uri, "default", &env),
            Err(ConfigError::Validation { ref field, .. }) if field == "uri"
        ));
    }
}
