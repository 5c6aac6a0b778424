use chrono::{DateTime, Utc};
use parley_types::models::Membership;
use parley_types::store::{DocumentStore, IdentityResolver};
use tracing::debug;

use crate::{ChatError, Engine};

impl<S: DocumentStore, R: IdentityResolver> Engine<S, R> {
    /// Set the caller's read marker to `at`. Plain overwrite: an older `at`
    /// moves the marker backwards.
    pub fn mark_read(&self, conversation_id: &str, user_id: &str, at: DateTime<Utc>) -> Result<Membership, ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::MissingField("conversationId"));
        }
        let membership = self.membership_or_deny(conversation_id, user_id, ChatError::NotAMember)?;

        debug!("Marking {} read for {} at {}", conversation_id, user_id, at);
        self.touch_last_read(&membership.id, at)
    }
}
