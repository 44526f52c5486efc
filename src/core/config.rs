use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

/// API credentials issued by the streaming service.
///
/// The secret key is the base64 string handed out by the service; it is only
/// decoded when a signer is built from it.
#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: Secret<String>,
    secret_key: Secret<String>,
    passphrase: Secret<String>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for Credentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credentials", 3)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("passphrase", "[REDACTED]")?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialsHelper {
            api_key: String,
            secret_key: String,
            passphrase: String,
        }

        let helper = CredentialsHelper::deserialize(deserializer)?;
        Ok(Self::new(helper.api_key, helper.secret_key, helper.passphrase))
    }
}

impl Credentials {
    #[must_use]
    pub fn new(api_key: String, secret_key: String, passphrase: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            passphrase: Secret::new(passphrase),
        }
    }

    /// Check that every credential component is present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
            && !self.secret_key.expose_secret().is_empty()
            && !self.passphrase.expose_secret().is_empty()
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get base64 secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// Get passphrase (use carefully - exposes secret)
    pub fn passphrase(&self) -> &str {
        self.passphrase.expose_secret()
    }
}

/// Where the stream lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub path: String,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, path: impl Into<String>, secure: bool) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Self {
            host: host.into(),
            path,
            secure,
        }
    }

    /// Full WebSocket URL for this endpoint
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.host, self.path)
    }
}

/// Which message component is signed during authentication.
///
/// The raw WebSocket deployment signs the connection path itself; the
/// Socket.IO deployment signs the fixed string `/socket.io/`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SignaturePayload {
    #[default]
    ConnectionPath,
    Fixed(String),
}

impl SignaturePayload {
    pub fn socket_io() -> Self {
        Self::Fixed("/socket.io/".to_string())
    }

    pub fn resolve<'a>(&'a self, endpoint: &'a Endpoint) -> &'a str {
        match self {
            Self::ConnectionPath => &endpoint.path,
            Self::Fixed(message) => message,
        }
    }
}

/// JSON key carrying the signature in the auth frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureField {
    #[default]
    Signature,
    Sign,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound for the transport handshake
    pub connect_timeout: Duration,
    /// Upper bound for a single outbound frame write
    pub send_timeout: Option<Duration>,
    /// Capacity of the event broadcast buffer; oldest events are dropped for
    /// receivers that fall further behind
    pub event_capacity: usize,
    pub signature_payload: SignaturePayload,
    pub signature_field: SignatureField,
    /// Log every stream body at debug level
    pub log_streams: bool,
    pub auth_request_id: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: None,
            event_capacity: 1024,
            signature_payload: SignaturePayload::default(),
            signature_field: SignatureField::default(),
            log_streams: false,
            auth_request_id: "auth".to_string(),
        }
    }
}

/// Everything a session needs before it can connect.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub options: ConnectionOptions,
}

impl StreamConfig {
    #[must_use]
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            options: ConnectionOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY`
    /// - `{PREFIX}_SECRET_KEY` (base64)
    /// - `{PREFIX}_PASSPHRASE`
    /// - `{PREFIX}_HOST`
    /// - `{PREFIX}_PATH` (optional, defaults to `/`)
    /// - `{PREFIX}_SECURE` (optional, defaults to true)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let required = |name: &str| {
            let var = format!("{}_{}", prefix, name);
            env::var(&var).map_err(|_| ConfigError::MissingEnvironmentVariable(var))
        };

        let api_key = required("API_KEY")?;
        let secret_key = required("SECRET_KEY")?;
        let passphrase = required("PASSPHRASE")?;
        let host = required("HOST")?;

        let path = env::var(format!("{}_PATH", prefix)).unwrap_or_else(|_| "/".to_string());

        let secure_var = format!("{}_SECURE", prefix);
        let secure = match env::var(&secure_var) {
            Ok(value) => value.parse::<bool>().map_err(|_| {
                ConfigError::InvalidConfiguration(format!(
                    "{} must be true or false, got '{}'",
                    secure_var, value
                ))
            })?,
            Err(_) => true,
        };

        Ok(Self::new(
            Endpoint::new(host, path, secure),
            Credentials::new(api_key, secret_key, passphrase),
        ))
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no .env file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let secure = Endpoint::new("stream.example.com", "/price.tickers", true);
        assert_eq!(secure.url(), "wss://stream.example.com/price.tickers");

        let plain = Endpoint::new("localhost:8080", "price.tickers", false);
        assert_eq!(plain.path, "/price.tickers");
        assert_eq!(plain.url(), "ws://localhost:8080/price.tickers");
    }

    #[test]
    fn test_credentials_are_redacted() {
        let credentials = Credentials::new(
            "key".to_string(),
            "c2VjcmV0".to_string(),
            "phrase".to_string(),
        );
        let json = serde_json::to_string(&credentials).unwrap();
        assert!(!json.contains("c2VjcmV0"));
        assert!(json.contains("[REDACTED]"));
        assert!(!format!("{:?}", credentials).contains("c2VjcmV0"));
    }

    #[test]
    fn test_credentials_deserialize() {
        let credentials: Credentials = serde_json::from_str(
            r#"{"api_key":"k","secret_key":"c2VjcmV0","passphrase":"p"}"#,
        )
        .unwrap();
        assert_eq!(credentials.api_key(), "k");
        assert_eq!(credentials.secret_key(), "c2VjcmV0");
        assert!(credentials.is_complete());
    }

    #[test]
    fn test_signature_payload_resolution() {
        let endpoint = Endpoint::new("h", "/price.tickers", true);
        assert_eq!(
            SignaturePayload::ConnectionPath.resolve(&endpoint),
            "/price.tickers"
        );
        assert_eq!(SignaturePayload::socket_io().resolve(&endpoint), "/socket.io/");
    }

    #[test]
    fn test_from_env_missing_variable() {
        let result = StreamConfig::from_env("FXSTREAM_TEST_UNSET_PREFIX");
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvironmentVariable(var))
                if var == "FXSTREAM_TEST_UNSET_PREFIX_API_KEY"
        ));
    }

    #[test]
    fn test_from_env_reads_all_fields() {
        env::set_var("FXSTREAM_CFG_TEST_API_KEY", "key");
        env::set_var("FXSTREAM_CFG_TEST_SECRET_KEY", "c2VjcmV0");
        env::set_var("FXSTREAM_CFG_TEST_PASSPHRASE", "phrase");
        env::set_var("FXSTREAM_CFG_TEST_HOST", "stream.example.com");
        env::set_var("FXSTREAM_CFG_TEST_PATH", "/price.tickers");
        env::set_var("FXSTREAM_CFG_TEST_SECURE", "false");

        let config = StreamConfig::from_env("fxstream_cfg_test").unwrap();
        assert_eq!(config.endpoint.url(), "ws://stream.example.com/price.tickers");
        assert_eq!(config.credentials.passphrase(), "phrase");
        assert_eq!(config.options.event_capacity, 1024);
    }
}
