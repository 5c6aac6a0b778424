use parley_types::api::ErrorCode;
use parley_types::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("cannot open a direct conversation with yourself")]
    SelfDmNotAllowed,

    #[error("no user with email {0}")]
    UserNotFound(String),

    #[error("not a member of conversation {0}")]
    NotAMember(String),

    #[error("access to conversation {0} is forbidden")]
    Forbidden(String),

    #[error("invalid message text: {0}")]
    InvalidText(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    StoreUnavailable(StoreError),

    /// A multi-document sequence failed after its first write landed.
    /// Nothing is rolled back.
    #[error("partial write after {written}: {reason}")]
    PartialWrite { written: String, reason: String },
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingField(_) => ErrorCode::MissingField,
            Self::SelfDmNotAllowed => ErrorCode::SelfDmNotAllowed,
            Self::UserNotFound(_) => ErrorCode::UserNotFound,
            Self::NotAMember(_) => ErrorCode::NotAMember,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::InvalidText(_) => ErrorCode::InvalidText,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            Self::PartialWrite { .. } => ErrorCode::PartialWrite,
        }
    }

    /// Re-label a failure that happened after `written` was committed.
    pub(crate) fn after_write(self, written: &str) -> Self {
        match self {
            Self::PartialWrite { .. } => self,
            other => Self::PartialWrite {
                written: written.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, id } => Self::NotFound(format!("{}/{} not found", collection, id)),
            other => Self::StoreUnavailable(other),
        }
    }
}
