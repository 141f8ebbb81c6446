//! The OAuth `state` parameter: base64url JSON naming who started a login and
//! where to report back.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use teamsforce_core::domain::token::ChatId;

use crate::activity::ConversationReference;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthStateError {
    #[error("state is not valid base64url")]
    Encoding,
    #[error("state payload is malformed: {0}")]
    Payload(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStateBlob {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teams_chat_id: Option<String>,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_reference: Option<ConversationReference>,
}

impl AuthStateBlob {
    /// Token owner: the Teams chat id, or the user id when none was recorded.
    pub fn chat_id(&self) -> ChatId {
        ChatId(
            self.teams_chat_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| self.user_id.clone()),
        )
    }

    pub fn encode(&self) -> Result<String, AuthStateError> {
        let json =
            serde_json::to_vec(self).map_err(|error| AuthStateError::Payload(error.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Result<Self, AuthStateError> {
        // Padding is tolerated; some clients re-pad query values.
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim().trim_end_matches('='))
            .map_err(|_| AuthStateError::Encoding)?;
        let blob: Self = serde_json::from_slice(&bytes)
            .map_err(|error| AuthStateError::Payload(error.to_string()))?;
        if blob.nonce.trim().is_empty() || blob.user_id.trim().is_empty() {
            return Err(AuthStateError::Payload("nonce and userId are required".to_owned()));
        }
        Ok(blob)
    }
}
