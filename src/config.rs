//! Configuration management

use std::{env, fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use gateway_core::Service;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Credential verification
    pub auth: AuthConfig,
    /// Backend base addresses
    pub upstreams: UpstreamsConfig,
    /// Outbound transport behaviour
    pub forwarding: ForwardingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: vec![".env".to_string()],
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstreams: UpstreamsConfig::default(),
            forwarding: ForwardingConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum size of a body the gateway must parse itself (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(5),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Bearer credential verification settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to sign tokens.
    /// Supports a literal value or `env:VAR_NAME`.
    pub jwt_secret: Option<String>,
    /// Required `iss` claim, if set
    pub issuer: Option<String>,
    /// Required `aud` claim, if set
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp`/`nbf` (default: none)
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Some("env:JWT_SECRET".to_string()),
            issuer: None,
            audience: None,
            leeway: Duration::ZERO,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl AuthConfig {
    /// Resolve the signing secret (expand `env:` references).
    ///
    /// An `env:` reference to an unset variable resolves to `None`, never to
    /// the literal reference text.
    #[must_use]
    pub fn resolve_jwt_secret(&self) -> Option<String> {
        let secret = self.jwt_secret.as_ref()?;
        let resolved = match secret.strip_prefix("env:") {
            Some(var_name) => env::var(var_name).ok()?,
            None => secret.clone(),
        };
        (!resolved.is_empty()).then_some(resolved)
    }
}

/// Base address of each backend service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamsConfig {
    /// User service
    pub user: String,
    /// File service
    pub file: String,
    /// Analytics service
    pub analytics: String,
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        let local = "http://localhost:8081".to_string();
        Self {
            user: local.clone(),
            file: local.clone(),
            analytics: local,
        }
    }
}

impl UpstreamsConfig {
    /// Base address configured for `service`
    #[must_use]
    pub fn base_url(&self, service: Service) -> &str {
        match service {
            Service::User => &self.user,
            Service::File => &self.file,
            Service::Analytics => &self.analytics,
        }
    }
}

/// Outbound transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// TCP connect deadline
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Deadline for upstream response headers, and for a whole buffered relay
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Longest pause tolerated between chunks of a streamed body
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Idle keep-alive connections kept per backend host
    pub pool_max_idle_per_host: usize,
    /// Report connection failures as 502 and timeouts as 504 instead of 500
    pub distinct_gateway_status: bool,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            pool_max_idle_per_host: 10,
            distinct_gateway_status: false,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (API_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("API_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        config.expand_env_vars()?;
        config.apply_port_env()?;

        Ok(config)
    }

    /// Honor the plain `PORT` variable, which may come from an env file.
    fn apply_port_env(&mut self) -> Result<()> {
        match env::var("PORT") {
            Ok(port) if !port.trim().is_empty() => {
                self.server.port = port
                    .trim()
                    .parse()
                    .map_err(|e| Error::Config(format!("Invalid PORT '{port}': {e}")))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in upstream addresses
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for url in [
            &mut self.upstreams.user,
            &mut self.upstreams.file,
            &mut self.upstreams.analytics,
        ] {
            *url = Self::expand_string(&re, url);
        }

        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
