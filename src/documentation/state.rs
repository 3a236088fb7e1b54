use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::messages::{Identifier, InboundMessage};

/// One line of the live transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Structured documentation returned for a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentationNote {
    /// Correlation id of the request this answers, if known
    pub request_id: Option<String>,
    pub request_type: Option<String>,
    pub body: Value,
    pub received_at: DateTime<Utc>,
}

/// The one documentation request awaiting its answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    pub request_id: String,
    pub request_type: String,
    pub sent_at: DateTime<Utc>,
}

/// What changed after an inbound message was applied
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentationEvent {
    Authenticated { review_id: Identifier },
    TranscriptAppended(TranscriptEntry),
    OobUpdated { request_type: String },
    NoteReceived(DocumentationNote),
    SessionStarted { review_id: Identifier },
    Error(Value),
}

/// Projection of the inbound message stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentationState {
    pub review_id: Option<Identifier>,
    pub session_review_id: Option<Identifier>,
    pub transcript: Vec<TranscriptEntry>,
    /// Latest out-of-band payload per request type
    pub oob: HashMap<String, Value>,
    pub notes: Vec<DocumentationNote>,
    pub pending: Option<PendingRequest>,
    pub last_error: Option<Value>,
}

impl DocumentationState {
    /// Parse and apply one text frame; malformed JSON is logged and ignored
    pub fn handle_text(&mut self, text: &str) -> Option<DocumentationEvent> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => Some(self.apply(message)),
            Err(e) => {
                warn!("Dropping malformed documentation message: {}", e);
                None
            }
        }
    }

    pub fn apply(&mut self, message: InboundMessage) -> DocumentationEvent {
        match message {
            InboundMessage::AuthenticationSuccess { review_id } => {
                info!("Documentation session authenticated (review {})", review_id);
                self.review_id = Some(review_id.clone());
                DocumentationEvent::Authenticated { review_id }
            }
            InboundMessage::OpenaiMessage { message } => {
                let entry = TranscriptEntry {
                    text: message.text(),
                    role: message.role,
                    received_at: Utc::now(),
                };
                self.transcript.push(entry.clone());
                DocumentationEvent::TranscriptAppended(entry)
            }
            InboundMessage::OobResponse { content } => {
                debug!("Out-of-band response for {}", content.request_type);
                self.oob.insert(content.request_type.clone(), content.data);
                DocumentationEvent::OobUpdated {
                    request_type: content.request_type,
                }
            }
            InboundMessage::Documentation {
                message,
                request_id,
            } => {
                let note = self.resolve(message, request_id);
                self.notes.push(note.clone());
                DocumentationEvent::NoteReceived(note)
            }
            InboundMessage::SessionStarted { review_id } => {
                info!("Documentation session started (review {})", review_id);
                self.session_review_id = Some(review_id.clone());
                DocumentationEvent::SessionStarted { review_id }
            }
            InboundMessage::Error { details } => {
                let details = Value::Object(details);
                error!("Documentation service error: {}", details);
                self.last_error = Some(details.clone());
                DocumentationEvent::Error(details)
            }
        }
    }

    /// Record a sent request; a newer request replaces an unanswered one
    pub fn begin_request(&mut self, request: PendingRequest) {
        if let Some(previous) = self.pending.replace(request) {
            warn!(
                "Documentation request {} superseded before a response arrived",
                previous.request_id
            );
        }
    }

    fn resolve(&mut self, body: Value, request_id: Option<String>) -> DocumentationNote {
        let matched = match (&request_id, &self.pending) {
            (Some(id), Some(pending)) => pending.request_id == *id,
            // Untagged responses answer the most recent request
            (None, Some(_)) => true,
            (_, None) => false,
        };

        let pending = if matched { self.pending.take() } else { None };
        if pending.is_none() {
            if let Some(id) = &request_id {
                warn!("Documentation response for unknown request {}", id);
            }
        }

        DocumentationNote {
            request_id: request_id.or_else(|| pending.as_ref().map(|p| p.request_id.clone())),
            request_type: pending.map(|p| p.request_type),
            body,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(id: &str, kind: &str) -> PendingRequest {
        PendingRequest {
            request_id: id.to_string(),
            request_type: kind.to_string(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn malformed_json_leaves_state_unchanged() {
        let mut state = DocumentationState::default();
        state.handle_text(
            r#"{"type":"openai_message","message":{"role":"user","content":[{"text":"hi"}]}}"#,
        );
        let before = state.transcript.clone();

        assert!(state.handle_text("{not valid json").is_none());
        assert!(state.handle_text(r#"{"type":"unknown_kind"}"#).is_none());

        assert_eq!(state.transcript, before);
        assert!(state.notes.is_empty());
        assert!(state.review_id.is_none());
    }

    #[test]
    fn authentication_captures_review_id() {
        let mut state = DocumentationState::default();
        let event = state
            .handle_text(r#"{"type":"authentication_success","review_id":31}"#)
            .unwrap();
        assert_eq!(state.review_id, Some(Identifier::Number(31)));
        assert!(matches!(event, DocumentationEvent::Authenticated { .. }));
    }

    #[test]
    fn tagged_response_resolves_matching_request() {
        let mut state = DocumentationState::default();
        state.begin_request(pending("r-1", "soap_note"));

        let event = state.apply(InboundMessage::Documentation {
            message: json!({"plan": "rest"}),
            request_id: Some("r-1".to_string()),
        });

        match event {
            DocumentationEvent::NoteReceived(note) => {
                assert_eq!(note.request_id.as_deref(), Some("r-1"));
                assert_eq!(note.request_type.as_deref(), Some("soap_note"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(state.pending.is_none());
    }

    #[test]
    fn stale_tagged_response_keeps_pending_request() {
        let mut state = DocumentationState::default();
        state.begin_request(pending("r-2", "summary"));

        state.apply(InboundMessage::Documentation {
            message: json!("old"),
            request_id: Some("r-1".to_string()),
        });

        assert_eq!(state.notes[0].request_type, None);
        assert_eq!(state.pending.as_ref().unwrap().request_id, "r-2");
    }

    #[test]
    fn untagged_response_answers_most_recent_request() {
        let mut state = DocumentationState::default();
        state.begin_request(pending("r-1", "summary"));
        state.begin_request(pending("r-2", "prescription"));

        state.apply(InboundMessage::Documentation {
            message: json!({"drug": "amoxicillin"}),
            request_id: None,
        });

        let note = &state.notes[0];
        assert_eq!(note.request_id.as_deref(), Some("r-2"));
        assert_eq!(note.request_type.as_deref(), Some("prescription"));
    }

    #[test]
    fn oob_response_updates_structured_fields() {
        let mut state = DocumentationState::default();
        state.handle_text(
            r#"{"type":"oob_response","content":{"request_type":"diagnosis","data":["flu"]}}"#,
        );
        state.handle_text(
            r#"{"type":"oob_response","content":{"request_type":"diagnosis","data":["cold"]}}"#,
        );
        assert_eq!(state.oob["diagnosis"], json!(["cold"]));
    }

    #[test]
    fn error_is_recorded_not_raised() {
        let mut state = DocumentationState::default();
        let event = state
            .handle_text(r#"{"type":"error","message":"model overloaded"}"#)
            .unwrap();
        assert!(matches!(event, DocumentationEvent::Error(_)));
        assert_eq!(state.last_error.as_ref().unwrap()["message"], "model overloaded");
    }
}
