use crate::error::{ClientError, Result};
use base64::Engine;
use serde_json::Value;

/// The authenticated identity for the lifetime of the client. Built once
/// from the bearer credential and passed to whoever needs the user id;
/// nothing in this crate reads it from global state.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl Session {
    /// Extracts the subject id from a JWT-shaped bearer token. The token is
    /// otherwise opaque: no signature verification happens client-side.
    pub fn from_token(token: &str) -> Result<Self> {
        let payload = token.split('.').nth(1).ok_or(ClientError::InvalidToken)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ClientError::InvalidToken)?;
        let claims: Value =
            serde_json::from_slice(&bytes).map_err(|_| ClientError::InvalidToken)?;

        let user_id = claims
            .get("sub")
            .or_else(|| claims.get("id"))
            .or_else(|| claims.get("userId"))
            .and_then(|v| v.as_str())
            .ok_or(ClientError::InvalidToken)?;

        Ok(Self {
            user_id: user_id.to_string(),
            token: token.to_string(),
        })
    }
}
