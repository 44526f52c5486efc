use crate::core::config::Credentials;
use crate::core::errors::StreamError;
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Method every handshake signature is computed for
pub const SIGN_METHOD: &str = "GET";

/// Sign `timestamp || method || message` with a base64-encoded HMAC-SHA256 key
///
/// # Arguments
/// * `secret_key_b64` - Secret key exactly as issued (base64)
/// * `timestamp` - Unix seconds, rendered in decimal
/// * `method` - HTTP method, usually `GET`
/// * `message` - Path or body being signed
///
/// # Returns
/// The base64-encoded 32-byte digest
pub fn sign(
    secret_key_b64: &str,
    timestamp: i64,
    method: &str,
    message: &str,
) -> Result<String, StreamError> {
    let key = decode_secret(secret_key_b64)?;
    sign_with_key(&key, timestamp, method, message)
}

fn decode_secret(secret_key_b64: &str) -> Result<Zeroizing<Vec<u8>>, StreamError> {
    general_purpose::STANDARD
        .decode(secret_key_b64)
        .map(Zeroizing::new)
        .map_err(|e| StreamError::InvalidKey(format!("secret key is not valid base64: {}", e)))
}

fn sign_with_key(
    key: &[u8],
    timestamp: i64,
    method: &str,
    message: &str,
) -> Result<String, StreamError> {
    let prehash = format!("{}{}{}", timestamp, method, message);

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StreamError::InvalidKey(format!("Failed to create HMAC: {}", e)))?;
    mac.update(prehash.as_bytes());

    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Signer trait for handshake authentication
pub trait Signer: Send + Sync {
    /// Sign a message for the given timestamp and method
    fn sign_message(&self, timestamp: i64, method: &str, message: &str)
        -> Result<String, StreamError>;

    /// Headers for deployments that authenticate during the HTTP upgrade
    /// instead of with an auth frame
    fn handshake_headers(
        &self,
        timestamp: i64,
        path: &str,
    ) -> Result<HashMap<String, String>, StreamError>;
}

/// HMAC-SHA256 signer holding the decoded key for the session's lifetime
pub struct HmacSigner {
    key: Zeroizing<Vec<u8>>,
    api_key: String,
    passphrase: String,
}

impl HmacSigner {
    /// Decode the secret once; a bad key fails here, before any connection
    pub fn new(credentials: &Credentials) -> Result<Self, StreamError> {
        Ok(Self {
            key: decode_secret(credentials.secret_key())?,
            api_key: credentials.api_key().to_string(),
            passphrase: credentials.passphrase().to_string(),
        })
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn sign_message(
        &self,
        timestamp: i64,
        method: &str,
        message: &str,
    ) -> Result<String, StreamError> {
        sign_with_key(&self.key, timestamp, method, message)
    }

    fn handshake_headers(
        &self,
        timestamp: i64,
        path: &str,
    ) -> Result<HashMap<String, String>, StreamError> {
        let signature = self.sign_message(timestamp, SIGN_METHOD, path)?;

        let mut headers = HashMap::new();
        headers.insert("FX-ACCESS-SIGN".to_string(), signature);
        headers.insert("FX-ACCESS-TIMESTAMP".to_string(), timestamp.to_string());
        headers.insert("FX-ACCESS-KEY".to_string(), self.api_key.clone());
        headers.insert("FX-ACCESS-PASSPHRASE".to_string(), self.passphrase.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Ok(headers)
    }
}
