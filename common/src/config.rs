use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Feedback host for the sandbox (development) environment
pub const SANDBOX_HOST: &str = "feedback.sandbox.push.apple.com";
/// Feedback host for the production environment
pub const PRODUCTION_HOST: &str = "feedback.push.apple.com";
/// Both feedback hosts listen on the same port
pub const FEEDBACK_PORT: u16 = 2196;

const SANDBOX_ADDR_ENV: &str = "APNS_FEEDBACK_SANDBOX_ADDR";
const PRODUCTION_ADDR_ENV: &str = "APNS_FEEDBACK_PRODUCTION_ADDR";
const CA_FILE_ENV: &str = "APNS_FEEDBACK_CA_FILE";
const CONNECT_TIMEOUT_ENV: &str = "APNS_FEEDBACK_CONNECT_TIMEOUT_SECS";
const READ_TIMEOUT_ENV: &str = "APNS_FEEDBACK_READ_TIMEOUT_SECS";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Selects which feedback service to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Development builds, tokens issued by the sandbox gateway
    Sandbox,
    /// App Store and ad-hoc builds
    Production,
}

impl Environment {
    /// The well-known feedback endpoint for this environment
    pub fn default_endpoint(self) -> Endpoint {
        match self {
            Environment::Sandbox => Endpoint::new(SANDBOX_HOST, FEEDBACK_PORT),
            Environment::Production => Endpoint::new(PRODUCTION_HOST, FEEDBACK_PORT),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => f.write_str("sandbox"),
            Environment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "development" | "dev" => Ok(Environment::Sandbox),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Host and port of a feedback service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// DNS name, also used for TLS server name verification
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    /// Parses `host:port`; a missing port defaults to the feedback port
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidEndpoint(s.to_string()));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(ConfigError::InvalidEndpoint(s.to_string())),
            None => Ok(Self::new(s, FEEDBACK_PORT)),
        }
    }
}

/// Errors raised while reading configuration values
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown environment '{0}', expected 'sandbox' or 'production'")]
    UnknownEnvironment(String),
    #[error("invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings for the secure channel to the feedback service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Overrides the sandbox endpoint
    pub sandbox_endpoint:    Option<Endpoint>,
    /// Overrides the production endpoint
    pub production_endpoint: Option<Endpoint>,
    /// PEM bundle of trusted roots; the platform store is used when unset
    pub ca_path:             Option<PathBuf>,
    /// Upper bound on TCP connect
    pub connect_timeout:     Duration,
    /// Upper bound on a single blocking read, `None` waits forever
    pub read_timeout:        Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sandbox_endpoint:    None,
            production_endpoint: None,
            ca_path:             None,
            connect_timeout:     DEFAULT_CONNECT_TIMEOUT,
            read_timeout:        None,
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables
    ///
    /// Reads APNS_FEEDBACK_SANDBOX_ADDR, APNS_FEEDBACK_PRODUCTION_ADDR,
    /// APNS_FEEDBACK_CA_FILE, APNS_FEEDBACK_CONNECT_TIMEOUT_SECS and
    /// APNS_FEEDBACK_READ_TIMEOUT_SECS. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Ok(addr) = env::var(SANDBOX_ADDR_ENV) {
            config.sandbox_endpoint = Some(addr.parse()?);
        }
        if let Ok(addr) = env::var(PRODUCTION_ADDR_ENV) {
            config.production_endpoint = Some(addr.parse()?);
        }
        if let Ok(path) = env::var(CA_FILE_ENV) {
            if !path.trim().is_empty() {
                config.ca_path = Some(PathBuf::from(path));
            }
        }
        if let Some(secs) = secs_from_env(CONNECT_TIMEOUT_ENV)? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = secs_from_env(READ_TIMEOUT_ENV)? {
            config.read_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Set the endpoint used for one environment
    pub fn with_endpoint(mut self, environment: Environment, endpoint: Endpoint) -> Self {
        match environment {
            Environment::Sandbox => self.sandbox_endpoint = Some(endpoint),
            Environment::Production => self.production_endpoint = Some(endpoint),
        }
        self
    }

    /// Set the trusted CA bundle
    pub fn with_ca_path<P: Into<PathBuf>>(mut self, ca_path: P) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Resolves an environment to the endpoint to dial
    pub fn endpoint(&self, environment: Environment) -> Endpoint {
        let configured = match environment {
            Environment::Sandbox => self.sandbox_endpoint.as_ref(),
            Environment::Production => self.production_endpoint.as_ref(),
        };
        configured
            .cloned()
            .unwrap_or_else(|| environment.default_endpoint())
    }
}

fn secs_from_env(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}
