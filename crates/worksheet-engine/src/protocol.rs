//! Wire frames exchanged with the execution server.
//!
//! Every frame is a JSON object sent as one WebSocket text message:
//!
//! ```text
//! { "id": 7, "tag": "Stdout", "text": "hello", "fields": { ... } }
//! ```
//!
//! Outbound frames are built from [`Request`] values and always carry an id,
//! even when nobody waits for the reply. Inbound frames echo the id of the
//! request they answer and are classified by their [`Tag`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Correlation id attached to every outbound frame.
pub type RequestId = u64;

/// Error type for frame encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid {tag} payload: {reason}")]
    InvalidPayload { tag: String, reason: String },
}

/// Frame tag vocabulary.
///
/// Unknown inbound tags are kept verbatim in [`Tag::Other`]; for an executing
/// cell they name an output channel like any other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    // Execution replies
    Done,
    NeedStdin,
    Stdin,
    Stdout,
    Stderr,
    Except,
    Interact,
    // Introspection replies
    Completions,
    Doc,
    Source,
    // Acknowledgements
    No,
    Yes,
    /// Synthesized by the client when the connection drops.
    Disconnect,
    // Requests
    Exec,
    Interrupt,
    Shutdown,
    GetCompletions,
    GetDoc,
    GetSource,
    ExecInteract,
    Other(String),
}

impl Tag {
    pub fn as_str(&self) -> &str {
        match self {
            Tag::Done => "Done",
            Tag::NeedStdin => "NeedStdin",
            Tag::Stdin => "Stdin",
            Tag::Stdout => "Stdout",
            Tag::Stderr => "Stderr",
            Tag::Except => "Except",
            Tag::Interact => "Interact",
            Tag::Completions => "Completions",
            Tag::Doc => "Doc",
            Tag::Source => "Source",
            Tag::No => "No",
            Tag::Yes => "Yes",
            Tag::Disconnect => "Disconnect",
            Tag::Exec => "Exec",
            Tag::Interrupt => "Interrupt",
            Tag::Shutdown => "Shutdown",
            Tag::GetCompletions => "GetCompletions",
            Tag::GetDoc => "GetDoc",
            Tag::GetSource => "GetSource",
            Tag::ExecInteract => "ExecInteract",
            Tag::Other(other) => other,
        }
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Done" => Tag::Done,
            "NeedStdin" => Tag::NeedStdin,
            "Stdin" => Tag::Stdin,
            "Stdout" => Tag::Stdout,
            "Stderr" => Tag::Stderr,
            "Except" => Tag::Except,
            "Interact" => Tag::Interact,
            "Completions" => Tag::Completions,
            "Doc" => Tag::Doc,
            "Source" => Tag::Source,
            "No" => Tag::No,
            "Yes" => Tag::Yes,
            "Disconnect" => Tag::Disconnect,
            "Exec" => Tag::Exec,
            "Interrupt" => Tag::Interrupt,
            "Shutdown" => Tag::Shutdown,
            "GetCompletions" => Tag::GetCompletions,
            "GetDoc" => Tag::GetDoc,
            "GetSource" => Tag::GetSource,
            "ExecInteract" => Tag::ExecInteract,
            _ => Tag::Other(s),
        }
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of protocol traffic, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Correlation id. Inbound frames without one cannot be routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    pub tag: Tag,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
}

impl Frame {
    pub fn new(tag: Tag) -> Self {
        Self {
            id: None,
            tag,
            text: None,
            fields: None,
        }
    }

    /// The frame delivered to every pending request when the connection drops.
    pub fn disconnect(id: RequestId) -> Self {
        Self {
            id: Some(id),
            ..Self::new(Tag::Disconnect)
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Text payload, or the empty string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Decode an inbound frame from a raw WebSocket text message.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Requests the client issues to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Run a cell's source in the named execution namespace.
    Exec {
        code: String,
        name: String,
        except_msg: bool,
    },

    /// Interrupt the running computation. Answered with `Yes` or `No`.
    Interrupt,

    /// Kill the worker. Never answered; the server drops the connection.
    Shutdown,

    /// Text typed by the user for a blocked `stdin` read. Empty text is EOF.
    Stdin { text: String },

    GetCompletions { word: String },

    GetDoc { word: String },

    GetSource { word: String },

    /// Re-run an interact with the current value of every control.
    ExecInteract { id: String, vals: Vec<Value> },
}

impl Request {
    pub fn tag(&self) -> Tag {
        match self {
            Request::Exec { .. } => Tag::Exec,
            Request::Interrupt => Tag::Interrupt,
            Request::Shutdown => Tag::Shutdown,
            Request::Stdin { .. } => Tag::Stdin,
            Request::GetCompletions { .. } => Tag::GetCompletions,
            Request::GetDoc { .. } => Tag::GetDoc,
            Request::GetSource { .. } => Tag::GetSource,
            Request::ExecInteract { .. } => Tag::ExecInteract,
        }
    }

    /// Build the outbound frame for this request.
    pub fn into_frame(self, id: RequestId) -> Frame {
        let frame = Frame::new(self.tag()).with_id(id);
        match self {
            Request::Exec {
                code,
                name,
                except_msg,
            } => {
                let mut fields = Map::new();
                fields.insert("name".to_string(), Value::String(name));
                fields.insert("except_msg".to_string(), Value::Bool(except_msg));
                frame.with_text(code).with_fields(fields)
            }
            Request::Interrupt | Request::Shutdown => frame,
            Request::Stdin { text } => frame.with_text(text),
            Request::GetCompletions { word }
            | Request::GetDoc { word }
            | Request::GetSource { word } => frame.with_text(word),
            Request::ExecInteract { id, vals } => {
                let mut fields = Map::new();
                fields.insert("id".to_string(), Value::String(id));
                fields.insert("vals".to_string(), Value::Array(vals));
                frame.with_fields(fields)
            }
        }
    }
}
