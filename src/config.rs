//! Configuration management for modproxy
//!
//! Settings are merged from four sources, lowest precedence first: built-in
//! defaults, a TOML file, `MODPROXY_*` environment variables and command-line
//! flags. The merged [`AppConfig`] is validated once into an immutable
//! [`ProxyConfig`] that every component receives at construction.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::app::cache::CacheConfig;
use crate::app::fetcher::FetcherConfig;
use crate::app::models::ModulePath;
use crate::app::vcs::RemoteResolver;
use crate::constants::{cache, env, fetch, http, vcs};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener and namespace settings
    pub server: ServerConfigToml,
    /// Destination host settings
    pub upstream: UpstreamConfigToml,
    /// Cache store settings
    pub cache: CacheConfigToml,
    /// Fetch execution settings
    pub fetch: FetchConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfigToml {
    /// Address to bind (IP only)
    pub listen_addr: String,
    /// Port to bind
    pub port: Option<u16>,
    /// Module path prefix this proxy answers for
    pub source_namespace: Option<String>,
}

impl Default for ServerConfigToml {
    fn default() -> Self {
        Self {
            listen_addr: http::DEFAULT_LISTEN_ADDR.to_string(),
            port: None,
            source_namespace: None,
        }
    }
}

/// TOML-friendly destination host configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfigToml {
    /// `host[/path]` under which module repositories live
    pub destination_root: Option<String>,
    /// User name paired with the token
    pub git_user: String,
    /// Access token (prefer the environment)
    pub token: Option<String>,
    /// Version-control binary
    pub git_binary: PathBuf,
    /// Ceiling for one tag listing
    #[serde(with = "humantime_serde")]
    pub list_timeout: Duration,
}

impl Default for UpstreamConfigToml {
    fn default() -> Self {
        Self {
            destination_root: None,
            git_user: vcs::DEFAULT_GIT_USER.to_string(),
            token: None,
            git_binary: PathBuf::from(vcs::DEFAULT_GIT_BINARY),
            list_timeout: fetch::DEFAULT_LIST_TIMEOUT,
        }
    }
}

impl fmt::Debug for UpstreamConfigToml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfigToml")
            .field("destination_root", &self.destination_root)
            .field("git_user", &self.git_user)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("git_binary", &self.git_binary)
            .field("list_timeout", &self.list_timeout)
            .finish()
    }
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Cache directory path
    pub cache_root: Option<PathBuf>,
    /// Refresh age for entries of branch versions (unset = never refresh)
    #[serde(with = "humantime_serde")]
    pub mutable_ref_ttl: Option<Duration>,
}

/// TOML-friendly fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfigToml {
    /// How long a request waits on an in-flight fetch
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Ceiling for one fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Global bound on simultaneously running fetches
    pub max_concurrent_fetches: usize,
    /// Module descriptor file name
    pub descriptor_file: String,
}

impl Default for FetchConfigToml {
    fn default() -> Self {
        Self {
            request_timeout: fetch::DEFAULT_REQUEST_TIMEOUT,
            fetch_timeout: fetch::DEFAULT_FETCH_TIMEOUT,
            max_concurrent_fetches: fetch::DEFAULT_MAX_CONCURRENT_FETCHES,
            descriptor_file: cache::DEFAULT_DESCRIPTOR_FILE.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when neither `-v` nor an env filter is given
    pub level: Option<String>,
}

/// Values supplied on the command line, highest precedence
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub listen_addr: Option<IpAddr>,
    pub cache_dir: Option<PathBuf>,
    pub source_namespace: Option<String>,
    pub destination_root: Option<String>,
}

/// Destination host settings after validation
#[derive(Clone)]
pub struct UpstreamConfig {
    pub destination_root: String,
    pub git_user: String,
    pub token: String,
    pub git_binary: PathBuf,
    pub list_timeout: Duration,
}

impl UpstreamConfig {
    /// Resolver deriving authenticated repository addresses from module paths
    pub fn resolver(&self) -> RemoteResolver {
        RemoteResolver::new(&self.destination_root, &self.git_user, &self.token)
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("destination_root", &self.destination_root)
            .field("git_user", &self.git_user)
            .field("token", &"***")
            .field("git_binary", &self.git_binary)
            .field("list_timeout", &self.list_timeout)
            .finish()
    }
}

/// Immutable runtime configuration, built once at startup
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub source_namespace: ModulePath,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub fetch: FetcherConfig,
}

impl AppConfig {
    /// Load configuration from the TOML file layer
    ///
    /// Uses `config_file_override` if given, otherwise the first existing
    /// file among the standard locations. No file at all is fine.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if an explicit file does not exist,
    /// or a read/parse error
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound { path }),
            Some(path) => Some(path),
            None => Self::find_config_file(),
        };

        match config_path {
            Some(path) => Self::load_from_file(&path).await,
            None => {
                debug!("No config file found in standard locations");
                Ok(Self::default())
            }
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./modproxy.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("modproxy").join("config.toml"));
        }
        #[cfg(unix)]
        search_paths.push(PathBuf::from("/etc/modproxy/config.toml"));

        search_paths.into_iter().find(|path| path.exists())
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `MODPROXY_*` variables from the process environment
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = get(env::LISTEN_ADDR) {
            self.server.listen_addr = value;
        }
        if let Some(value) = get(env::PORT) {
            self.server.port = Some(parse_value(env::PORT, &value)?);
        }
        if let Some(value) = get(env::CACHE_DIR) {
            self.cache.cache_root = Some(PathBuf::from(value));
        }
        if let Some(value) = get(env::TOKEN).or_else(|| get(env::TOKEN_FALLBACK)) {
            self.upstream.token = Some(value);
        }
        if let Some(value) = get(env::GIT_USER) {
            self.upstream.git_user = value;
        }
        if let Some(value) = get(env::SOURCE_NAMESPACE) {
            self.server.source_namespace = Some(value);
        }
        if let Some(value) = get(env::DESTINATION_ROOT) {
            self.upstream.destination_root = Some(value);
        }
        if let Some(value) = get(env::REQUEST_TIMEOUT) {
            self.fetch.request_timeout = parse_duration(env::REQUEST_TIMEOUT, &value)?;
        }
        if let Some(value) = get(env::FETCH_TIMEOUT) {
            self.fetch.fetch_timeout = parse_duration(env::FETCH_TIMEOUT, &value)?;
        }
        if let Some(value) = get(env::MAX_CONCURRENT_FETCHES) {
            self.fetch.max_concurrent_fetches = parse_value(env::MAX_CONCURRENT_FETCHES, &value)?;
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(addr) = overrides.listen_addr {
            self.server.listen_addr = addr.to_string();
        }
        if let Some(dir) = &overrides.cache_dir {
            self.cache.cache_root = Some(dir.clone());
        }
        if let Some(namespace) = &overrides.source_namespace {
            self.server.source_namespace = Some(namespace.clone());
        }
        if let Some(root) = &overrides.destination_root {
            self.upstream.destination_root = Some(root.clone());
        }
    }

    /// Validate and convert into the immutable runtime configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` for an absent required setting or
    /// `ConfigError::InvalidValue` for a malformed one
    pub fn to_runtime_config(&self) -> ConfigResult<ProxyConfig> {
        let port = self.server.port.ok_or_else(|| missing("server.port", env::PORT))?;
        let ip: IpAddr = parse_value("server.listen_addr", &self.server.listen_addr)?;

        let namespace = self
            .server
            .source_namespace
            .as_deref()
            .ok_or_else(|| missing("server.source_namespace", env::SOURCE_NAMESPACE))?;
        let source_namespace = ModulePath::new(namespace.trim_end_matches('/')).map_err(|e| {
            ConfigError::InvalidValue {
                field: "server.source_namespace".to_string(),
                value: namespace.to_string(),
                reason: e.to_string(),
            }
        })?;

        let destination_root = self
            .upstream
            .destination_root
            .as_deref()
            .ok_or_else(|| missing("upstream.destination_root", env::DESTINATION_ROOT))?;
        let destination_root = validate_destination_root(destination_root)?;

        let token = self
            .upstream
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("upstream.token", env::TOKEN))?;

        let cache_root = self
            .cache
            .cache_root
            .clone()
            .ok_or_else(|| missing("cache.cache_root", env::CACHE_DIR))?;

        if self.upstream.list_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "upstream.list_timeout".to_string(),
                value: format!("{:?}", self.upstream.list_timeout),
                reason: "Must be greater than zero".to_string(),
            });
        }

        let fetch = FetcherConfig {
            request_timeout: self.fetch.request_timeout,
            fetch_timeout: self.fetch.fetch_timeout,
            max_concurrent_fetches: self.fetch.max_concurrent_fetches,
            descriptor_file: self.fetch.descriptor_file.clone(),
        };
        fetch.validate()?;

        Ok(ProxyConfig {
            listen_addr: SocketAddr::new(ip, port),
            source_namespace,
            upstream: UpstreamConfig {
                destination_root,
                git_user: self.upstream.git_user.clone(),
                token,
                git_binary: self.upstream.git_binary.clone(),
                list_timeout: self.upstream.list_timeout,
            },
            cache: CacheConfig::with_cache_root(cache_root)
                .with_mutable_ref_ttl(self.cache.mutable_ref_ttl),
            fetch,
        })
    }
}

fn missing(field: &str, hint: &str) -> ConfigError {
    ConfigError::MissingField {
        field: field.to_string(),
        hint: hint.to_string(),
    }
}

fn parse_value<T>(field: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Accepts `host[/path]`, returns it without trailing slashes
fn validate_destination_root(root: &str) -> ConfigResult<String> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "upstream.destination_root".to_string(),
        value: root.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("Must not be empty"));
    }
    if trimmed.contains("://") {
        return Err(invalid("Give host[/path] without a scheme"));
    }
    let url = Url::parse(&format!("https://{}", trimmed))
        .map_err(|e| invalid(&format!("Not a valid host[/path]: {}", e)))?;
    if url.host_str().map_or(true, str::is_empty) || !url.username().is_empty() {
        return Err(invalid("Not a valid host[/path]"));
    }
    Ok(trimmed.to_string())
}
