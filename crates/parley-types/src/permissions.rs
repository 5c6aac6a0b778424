use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Update,
    Delete,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Subject {
    User(UserId),
}

/// Access-control entry attached to a stored document. The store enforces
/// these independently of application-level membership checks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub subject: Subject,
    pub capability: Capability,
}

impl PermissionGrant {
    pub fn user(user_id: impl Into<UserId>, capability: Capability) -> Self {
        Self {
            subject: Subject::User(user_id.into()),
            capability,
        }
    }

    pub fn allows(&self, user_id: &str, capability: Capability) -> bool {
        self.capability == capability && matches!(&self.subject, Subject::User(id) if id == user_id)
    }
}

/// Storage rendering: `read("user:abc")`.
impl fmt::Display for PermissionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Subject::User(id) => write!(f, "{}(\"user:{}\")", self.capability.as_str(), id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed permission entry: {0}")]
pub struct ParsePermissionError(pub String);

impl FromStr for PermissionGrant {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParsePermissionError(s.to_string());

        let (cap, rest) = s.split_once('(').ok_or_else(bad)?;
        let capability = match cap {
            "read" => Capability::Read,
            "update" => Capability::Update,
            "delete" => Capability::Delete,
            _ => return Err(bad()),
        };

        let subject = rest
            .strip_suffix(')')
            .and_then(|r| r.strip_prefix('"'))
            .and_then(|r| r.strip_suffix('"'))
            .ok_or_else(bad)?;
        let user_id = subject.strip_prefix("user:").filter(|id| !id.is_empty()).ok_or_else(bad)?;

        Ok(Self::user(user_id, capability))
    }
}
