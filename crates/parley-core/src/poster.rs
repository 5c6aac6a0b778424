use chrono::Utc;
use parley_types::models::{Message, MessageKind, MessageStatus, collections::MESSAGES};
use parley_types::store::{DocumentStore, Filter, IdentityResolver, ListQuery, Order, encode};
use tracing::{debug, error, warn};

use crate::ledger::derive_permissions;
use crate::{ChatError, Engine};

/// Upper bound on message length, in characters.
pub const MAX_TEXT_CHARS: usize = 2000;

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 100;

pub fn validate_text(text: &str) -> Result<(), ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::InvalidText("text is empty"));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(ChatError::InvalidText("text exceeds 2000 characters"));
    }
    Ok(())
}

impl<S: DocumentStore, R: IdentityResolver> Engine<S, R> {
    /// Append a message from `sender_id`, then refresh the conversation
    /// summary and the sender's read marker.
    ///
    /// The message is readable by whoever was a member at send time; later
    /// membership changes do not alter its grants.
    pub fn send(&self, conversation_id: &str, sender_id: &str, text: &str) -> Result<Message, ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::MissingField("conversationId"));
        }
        validate_text(text)?;

        let membership = self.membership_or_deny(conversation_id, sender_id, ChatError::NotAMember)?;
        let members = self.members_of(conversation_id)?;
        if members.len() < 2 {
            // Creation stopped before the other memberships were written
            warn!("Refusing to post into incomplete conversation {}", conversation_id);
            return Err(ChatError::NotFound(format!("conversation {} is incomplete", conversation_id)));
        }
        let permissions = derive_permissions(&members, None);

        let now = Utc::now();
        let record = Message {
            id: String::new(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };

        let message: Message = self
            .store
            .create(MESSAGES, None, encode(&record)?, &permissions)?
            .decode()?;
        debug!("Message {} appended to {}", message.id, conversation_id);

        let after = |e: ChatError| {
            error!("Message {} stored but follow-up write failed: {}", message.id, e);
            e.after_write(&message.id)
        };
        self.apply_last_message(conversation_id, text, sender_id, now)
            .map_err(after)?;
        self.touch_last_read(&membership.id, now).map_err(after)?;

        Ok(message)
    }

    /// Newest-first page of a conversation's messages, plus the total count.
    /// No cursor: concurrent sends shift offsets between pages.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        requester_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<(Vec<Message>, u64), ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::MissingField("conversationId"));
        }
        self.membership_or_deny(conversation_id, requester_id, ChatError::Forbidden)?;

        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let query = ListQuery::new(limit)
            .filter(Filter::eq("conversationId", conversation_id))
            .order(Order::NewestFirst)
            .offset(offset.unwrap_or(0));

        let page = self.store.list(MESSAGES, &query)?;
        let messages = page
            .documents
            .iter()
            .map(|doc| doc.decode().map_err(ChatError::from))
            .collect::<Result<Vec<Message>, _>>()?;

        Ok((messages, page.total))
    }
}
