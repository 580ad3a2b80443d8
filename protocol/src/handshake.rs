//! Identity extraction from the `CONNECT` handshake.
//!
//! The token carried in `jwt` is decoded for its claims only. Its signature is
//! NOT verified: the identity found here selects a bandwidth budget and must
//! not be used for authorization. The broker behind the proxy remains the
//! authority that accepts or rejects the credentials.

use crate::error::{ProtocolError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer};

/// The `CONNECT` options the proxy reads. Other fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectOptions {
    #[serde(default, deserialize_with = "optional_string")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub jwt: Option<String>,
}

/// Claims of a user token that can name the connecting identity.
#[derive(Debug, Default, Deserialize)]
pub struct TokenClaims {
    #[serde(default, deserialize_with = "optional_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub sub: Option<String>,
}

impl ConnectOptions {
    pub fn from_json(argument: &[u8]) -> Result<Self> {
        serde_json::from_slice(argument).map_err(ProtocolError::InvalidConnect)
    }

    /// Resolves the identity: `user` first, then the token's `name` or `sub`.
    ///
    /// A string `user` settles it, even when empty; the token is then not
    /// consulted.
    pub fn identity(&self) -> Result<Option<String>> {
        if let Some(user) = self.user.as_deref() {
            return Ok(non_empty(Some(user)).map(str::to_string));
        }
        match self.jwt.as_deref() {
            Some(token) => Ok(TokenClaims::decode_unverified(token)?.identity()),
            None => Ok(None),
        }
    }
}

impl TokenClaims {
    /// Decodes the claims segment of a compact `header.claims.signature`
    /// token without checking the signature.
    pub fn decode_unverified(token: &str) -> Result<Self> {
        let mut segments = token.split('.');
        let (Some(_header), Some(claims), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(ProtocolError::InvalidToken(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let claims = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('='))?;
        serde_json::from_slice(&claims).map_err(ProtocolError::TokenClaims)
    }

    pub fn identity(&self) -> Option<String> {
        non_empty(self.name.as_deref())
            .or_else(|| non_empty(self.sub.as_deref()))
            .map(str::to_string)
    }
}

/// Decodes a `CONNECT` argument into the identity it names, if any.
pub fn resolve_identity(argument: &[u8]) -> Result<Option<String>> {
    ConnectOptions::from_json(argument)?.identity()
}

/// A field of the wrong JSON type counts as absent.
fn optional_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Some(value),
        _ => None,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
