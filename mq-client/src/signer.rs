//! Per-request authentication metadata.
//!
//! The consumer asks a [`Signer`] for a fresh header map before every RPC.
//! How those headers authenticate the caller is the signer's business; the
//! default [`HeaderSigner`] only attaches identity and credential headers and
//! leaves cryptographic signing to a transport-level implementation.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Credentials;
use crate::error::{ClientError, Result};

/// Transport-level request headers.
pub type Metadata = HashMap<String, String>;

pub const CLIENT_ID_KEY: &str = "x-mq-client-id";
pub const NAMESPACE_KEY: &str = "x-mq-namespace";
pub const REQUEST_TIME_KEY: &str = "x-mq-request-time";
pub const LANGUAGE_KEY: &str = "x-mq-language";
pub const CLIENT_VERSION_KEY: &str = "x-mq-client-version";
pub const ACCESS_KEY: &str = "x-mq-access-key";
pub const SECURITY_TOKEN_KEY: &str = "x-mq-session-token";

/// Identity of the client on whose behalf a request is signed.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub client_id: &'a str,
    pub namespace: &'a str,
    pub credentials: Option<&'a Credentials>,
}

/// Produces authentication headers for an outgoing request.
pub trait Signer: Send + Sync {
    fn sign(&self, context: &SigningContext<'_>) -> Result<Metadata>;
}

/// Attaches identity headers plus access key and session token when
/// credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderSigner;

impl Signer for HeaderSigner {
    fn sign(&self, context: &SigningContext<'_>) -> Result<Metadata> {
        let mut metadata = Metadata::with_capacity(7);
        metadata.insert(CLIENT_ID_KEY.to_string(), context.client_id.to_string());
        metadata.insert(LANGUAGE_KEY.to_string(), "RUST".to_string());
        metadata.insert(
            CLIENT_VERSION_KEY.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        if !context.namespace.is_empty() {
            metadata.insert(NAMESPACE_KEY.to_string(), context.namespace.to_string());
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ClientError::Signing(format!("system clock before epoch: {}", e)))?;
        metadata.insert(REQUEST_TIME_KEY.to_string(), now.as_millis().to_string());

        if let Some(credentials) = context.credentials {
            if credentials.access_key.is_empty() {
                return Err(ClientError::Signing("empty access key".to_string()));
            }
            metadata.insert(ACCESS_KEY.to_string(), credentials.access_key.clone());
            if let Some(ref token) = credentials.security_token {
                metadata.insert(SECURITY_TOKEN_KEY.to_string(), token.clone());
            }
        }

        Ok(metadata)
    }
}
