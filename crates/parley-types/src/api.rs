use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Conversation, ConversationKind, Message, UserId};

// -- Requests --

pub const ACTIONS: &[&str] = &[
    "createDm",
    "createGroup",
    "sendMessage",
    "listConversations",
    "listMessages",
    "markRead",
];

/// Action-tagged request body. Required string fields default to empty so
/// that absence surfaces as a `MISSING_FIELD` from validation rather than a
/// parse failure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ChatRequest {
    #[serde(rename_all = "camelCase")]
    CreateDm {
        #[serde(default)]
        other_email: String,
    },

    #[serde(rename_all = "camelCase")]
    CreateGroup {
        #[serde(default)]
        title: String,
        #[serde(default)]
        member_emails: Vec<String>,
        #[serde(default)]
        photo_url: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        #[serde(default)]
        conversation_id: String,
        #[serde(default)]
        text: Option<String>,
    },

    ListConversations,

    #[serde(rename_all = "camelCase")]
    ListMessages {
        #[serde(default)]
        conversation_id: String,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },

    #[serde(rename_all = "camelCase")]
    MarkRead {
        #[serde(default)]
        conversation_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("request has no action")]
    MissingAction,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl RequestError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingAction => ErrorCode::MissingAction,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
            Self::Malformed(_) => ErrorCode::BadRequest,
        }
    }
}

impl ChatRequest {
    /// Parse a raw JSON body, distinguishing a missing or unknown action from
    /// a malformed payload.
    pub fn parse(body: &Value) -> Result<Self, RequestError> {
        let action = match body.get("action") {
            Some(Value::String(a)) if !a.trim().is_empty() => a.as_str(),
            _ => return Err(RequestError::MissingAction),
        };
        if !ACTIONS.contains(&action) {
            return Err(RequestError::UnknownAction(action.to_string()));
        }
        serde_json::from_value(body.clone()).map_err(|e| RequestError::Malformed(e.to_string()))
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateDm { .. } => "createDm",
            Self::CreateGroup { .. } => "createGroup",
            Self::SendMessage { .. } => "sendMessage",
            Self::ListConversations => "listConversations",
            Self::ListMessages { .. } => "listMessages",
            Self::MarkRead { .. } => "markRead",
        }
    }
}

// -- Responses --

/// Row of the conversation list, resolved for the requesting user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub kind: ConversationKind,
    pub title: String,
    pub photo_url: Option<String>,
    pub other_user_id: Option<UserId>,
    pub preview: String,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_sender_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread: bool,
    pub pinned: bool,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatResponse {
    #[serde(rename_all = "camelCase")]
    Conversation {
        conversation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reused: Option<bool>,
        conversation: Conversation,
    },

    Conversations {
        conversations: Vec<ConversationSummary>,
    },

    Message {
        message: Message,
    },

    Messages {
        messages: Vec<Message>,
        total: u64,
    },

    #[serde(rename_all = "camelCase")]
    Read {
        conversation_id: String,
        last_read_at: DateTime<Utc>,
    },
}

/// Stable outcome codes a client can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingField,
    SelfDmNotAllowed,
    UserNotFound,
    NotAMember,
    Forbidden,
    InvalidText,
    NotFound,
    StoreUnavailable,
    PartialWrite,
    MissingAction,
    UnknownAction,
    BadRequest,
    UnauthorizedNoUser,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub ok: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Success<T> {
    pub fn new(body: T) -> Self {
        Self { ok: true, body }
    }
}

#[derive(Debug, Serialize)]
pub struct Failure {
    pub ok: bool,
    pub error: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(error: ErrorCode, detail: Option<String>) -> Self {
        Self {
            ok: false,
            error,
            detail,
        }
    }
}
