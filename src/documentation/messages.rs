use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SessionError, SessionResult};

/// Backend-assigned id; the service sends either numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Number(i64),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Number(n) => write!(f, "{}", n),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

/// JSON messages sent to the AI medical session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "documentation.request")]
    DocumentationRequest { content: DocumentationRequest },

    #[serde(rename = "documentation.stop")]
    DocumentationStop,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentationRequest {
    pub request_type: String,
    pub details: String,
    pub appointment_id: String,
    /// Echoed back on the matching `documentation` message
    pub request_id: String,
}

/// JSON messages received from the AI medical session
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AuthenticationSuccess {
        review_id: Identifier,
    },
    OpenaiMessage {
        message: ChatMessage,
    },
    OobResponse {
        content: OobContent,
    },
    Documentation {
        message: Value,
        #[serde(default)]
        request_id: Option<String>,
    },
    SessionStarted {
        review_id: Identifier,
    },
    Error {
        #[serde(flatten)]
        details: serde_json::Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<ChatContent>,
}

impl ChatMessage {
    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content.iter().map(|c| c.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatContent {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OobContent {
    pub request_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Build `<base>?token=..[&review_id=..][&appointment_id=..]`
pub fn build_socket_url(
    base: &str,
    token: &str,
    review_id: Option<&str>,
    appointment_id: Option<&str>,
) -> SessionResult<String> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| SessionError::Socket(format!("invalid socket url {}: {}", base, e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(SessionError::Socket(format!(
                "unsupported socket scheme: {}",
                other
            )))
        }
    }

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("token", token);
        if let Some(id) = review_id {
            query.append_pair("review_id", id);
        }
        if let Some(id) = appointment_id {
            query.append_pair("appointment_id", id);
        }
    }

    Ok(url.to_string())
}
