//! Conversation registry: creation, direct-message deduplication and the
//! last-message summary.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parley_types::api::ConversationSummary;
use parley_types::models::{
    Conversation, ConversationKind, Membership, Role, UserId, collections::CONVERSATIONS,
    collections::MEMBERSHIPS,
};
use parley_types::permissions::PermissionGrant;
use parley_types::store::{DocumentStore, Filter, ID_FIELD, IdentityResolver, ListQuery, StoreError, encode};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::ledger::derive_permissions;
use crate::{ChatError, Engine, PAGE_SIZE, derived_key, fields};

const DIRECT_FALLBACK_TITLE: &str = "DM";
const GROUP_FALLBACK_TITLE: &str = "Group";
const EMPTY_PREVIEW: &str = "No messages";

/// Result of a create call. `reused` is set when an existing direct
/// conversation was returned instead of a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub conversation: Conversation,
    pub reused: bool,
}

/// Store key for the direct conversation between two users, independent of
/// argument order.
pub fn direct_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    derived_key("dm_", &[lo, hi])
}

impl<S: DocumentStore, R: IdentityResolver> Engine<S, R> {
    pub fn conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        Ok(self.store.get(CONVERSATIONS, conversation_id)?.decode()?)
    }

    /// The direct conversation both users are active members of, if any.
    ///
    /// Two membership listings and a batched conversation lookup, rather
    /// than one membership probe per conversation of `a`. A conversation
    /// missing either membership (left orphaned by a failed create) never
    /// appears in the intersection. With several candidates the oldest wins.
    pub fn find_existing_direct(&self, a: &str, b: &str) -> Result<Option<Conversation>, ChatError> {
        let of_a: BTreeSet<String> = self
            .memberships_of_user(a)?
            .into_iter()
            .map(|m| m.conversation_id)
            .collect();
        let shared: Vec<String> = self
            .memberships_of_user(b)?
            .into_iter()
            .map(|m| m.conversation_id)
            .filter(|id| of_a.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if shared.is_empty() {
            return Ok(None);
        }

        let mut found = self.conversations_by_id(&shared, Some(ConversationKind::Direct))?;
        found.sort_by(|x, y| x.created_at.cmp(&y.created_at).then_with(|| x.id.cmp(&y.id)));
        Ok(found.into_iter().next())
    }

    /// Open (or reuse) the direct conversation between `a` and `b`.
    ///
    /// The conversation is written under `direct_key(a, b)` with
    /// create-if-absent, so two racing creators cannot both succeed. The
    /// loser, or a caller retrying after a half-finished create, gets the
    /// existing conversation back with any missing membership filled in.
    pub fn create_direct(&self, a: &str, b: &str, creator: &str) -> Result<Created, ChatError> {
        if a.trim().is_empty() || b.trim().is_empty() {
            return Err(ChatError::MissingField("userId"));
        }
        if a == b {
            return Err(ChatError::SelfDmNotAllowed);
        }

        if let Some(conversation) = self.find_existing_direct(a, b)? {
            info!("Reusing direct conversation {} for {} / {}", conversation.id, a, b);
            return Ok(Created { conversation, reused: true });
        }

        let now = Utc::now();
        let members: Vec<UserId> = vec![a.to_string(), b.to_string()];
        let permissions = derive_permissions(&members, None);
        let key = direct_key(a, b);
        let record = Conversation {
            id: key.clone(),
            kind: ConversationKind::Direct,
            title: None,
            photo_url: None,
            created_by: creator.to_string(),
            created_at: now,
            last_message_text: None,
            last_message_at: None,
            last_message_sender_id: None,
        };
        let roles = [(a, Role::Member), (b, Role::Member)];

        match self.store.create(CONVERSATIONS, Some(&key), encode(&record)?, &permissions) {
            Ok(doc) => {
                let conversation: Conversation = doc.decode()?;
                self.attach_members(&conversation.id, &roles, now, &permissions)
                    .map_err(|e| ChatError::from(e).after_write(&conversation.id))?;

                info!("Created direct conversation {} for {} / {}", conversation.id, a, b);
                Ok(Created { conversation, reused: false })
            }
            Err(StoreError::Conflict { collection, id }) => {
                let conversation = self.conversation(&key)?;
                let present = self.members_of(&conversation.id)?;

                // Only ever complete the pair's own conversation
                let foreign = present.iter().any(|user_id| user_id != a && user_id != b);
                if conversation.kind != ConversationKind::Direct || foreign {
                    error!(
                        "Key {} for {} / {} is held by a conversation with other members",
                        conversation.id, a, b
                    );
                    return Err(StoreError::Conflict { collection, id }.into());
                }

                let missing: Vec<(&str, Role)> = roles
                    .iter()
                    .copied()
                    .filter(|(user_id, _)| !present.contains(*user_id))
                    .collect();
                if !missing.is_empty() {
                    warn!(
                        "Direct conversation {} is missing {} membership(s), repairing",
                        conversation.id,
                        missing.len()
                    );
                    self.attach_members(&conversation.id, &missing, conversation.created_at, &permissions)?;
                }

                info!("Reusing direct conversation {} for {} / {}", conversation.id, a, b);
                Ok(Created { conversation, reused: true })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a group owned by `creator`. The member list is de-duplicated
    /// and always includes the creator, who becomes its admin.
    pub fn create_group(
        &self,
        creator: &str,
        title: &str,
        member_ids: &[UserId],
        photo_url: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::MissingField("title"));
        }

        let mut members: Vec<UserId> = vec![creator.to_string()];
        for id in member_ids {
            if !id.trim().is_empty() && !members.contains(id) {
                members.push(id.clone());
            }
        }
        if members.len() < 2 {
            return Err(ChatError::MissingField("memberEmails"));
        }

        let now = Utc::now();
        let permissions = derive_permissions(&members, Some(creator));
        let record = Conversation {
            id: String::new(),
            kind: ConversationKind::Group,
            title: Some(title.to_string()),
            photo_url: photo_url.filter(|url| !url.trim().is_empty()),
            created_by: creator.to_string(),
            created_at: now,
            last_message_text: None,
            last_message_at: None,
            last_message_sender_id: None,
        };

        let conversation: Conversation = self
            .store
            .create(CONVERSATIONS, None, encode(&record)?, &permissions)?
            .decode()?;

        let roles: Vec<(&str, Role)> = members
            .iter()
            .map(|id| (id.as_str(), if id == creator { Role::Admin } else { Role::Member }))
            .collect();
        self.attach_members(&conversation.id, &roles, now, &permissions)
            .map_err(|e| ChatError::from(e).after_write(&conversation.id))?;

        info!("Created group {} '{}' with {} members", conversation.id, title, members.len());
        Ok(conversation)
    }

    /// Overwrite the summary fields. Last write wins: there is no check
    /// against a newer summary already stored.
    pub fn apply_last_message(
        &self,
        conversation_id: &str,
        text: &str,
        sender_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Conversation, ChatError> {
        let patch = fields(json!({
            "lastMessageText": text,
            "lastMessageAt": at,
            "lastMessageSenderId": sender_id,
        }));
        Ok(self.store.update(CONVERSATIONS, conversation_id, patch)?.decode()?)
    }

    /// Every conversation `user_id` belongs to, most recently active first
    /// (ties by id). Direct conversations missing their counterpart are left out.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummary>, ChatError> {
        let memberships: HashMap<String, Membership> = self
            .memberships_of_user(user_id)?
            .into_iter()
            .map(|m| (m.conversation_id.clone(), m))
            .collect();
        if memberships.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<String> = memberships.keys().cloned().collect();
        let mut conversations = self.conversations_by_id(&ids, None)?;
        conversations.sort_by(|x, y| y.activity_at().cmp(&x.activity_at()).then_with(|| x.id.cmp(&y.id)));

        let direct_ids: Vec<String> = conversations
            .iter()
            .filter(|c| c.kind == ConversationKind::Direct)
            .map(|c| c.id.clone())
            .collect();
        let counterparts = self.counterparts(&direct_ids, user_id)?;

        let mut titles: HashMap<UserId, String> = HashMap::new();
        let mut out = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let Some(membership) = memberships.get(&conversation.id) else {
                continue;
            };

            let (title, other_user_id) = match conversation.kind {
                ConversationKind::Group => (
                    conversation.title.clone().unwrap_or_else(|| GROUP_FALLBACK_TITLE.to_string()),
                    None,
                ),
                ConversationKind::Direct => match counterparts.get(&conversation.id) {
                    Some(other) => {
                        let title = titles
                            .entry(other.clone())
                            .or_insert_with(|| self.display_title(other))
                            .clone();
                        (title, Some(other.clone()))
                    }
                    // Half-created: the counterpart membership never landed
                    None => {
                        debug!("Skipping direct conversation {} without a counterpart", conversation.id);
                        continue;
                    }
                },
            };

            out.push(summarize(conversation, membership, user_id, title, other_user_id));
        }
        Ok(out)
    }

    /// Fetch conversations in id batches of `PAGE_SIZE`, optionally of one kind.
    fn conversations_by_id(
        &self,
        ids: &[String],
        kind: Option<ConversationKind>,
    ) -> Result<Vec<Conversation>, ChatError> {
        let mut out = Vec::with_capacity(ids.len());
        for batch in ids.chunks(PAGE_SIZE as usize) {
            let mut query = ListQuery::new(PAGE_SIZE).filter(Filter::any_of(ID_FIELD, batch.iter().cloned()));
            if let Some(kind) = kind {
                query = query.filter(Filter::eq("kind", kind.as_str()));
            }

            for doc in self.store.list(CONVERSATIONS, &query)?.documents {
                out.push(doc.decode()?);
            }
        }
        Ok(out)
    }

    /// For each direct conversation, the one member other than `user_id`.
    fn counterparts(&self, direct_ids: &[String], user_id: &str) -> Result<HashMap<String, UserId>, ChatError> {
        let mut out = HashMap::new();
        for batch in direct_ids.chunks(PAGE_SIZE as usize) {
            let query = ListQuery::default()
                .filter(Filter::any_of("conversationId", batch.iter().cloned()))
                .filter(Filter::ne("userId", user_id));

            for doc in self.list_all(MEMBERSHIPS, query)? {
                let m: Membership = doc.decode()?;
                out.entry(m.conversation_id).or_insert(m.user_id);
            }
        }
        Ok(out)
    }

    /// Directory name or email for `user_id`; lookup failures fall back to
    /// the generic direct-message label.
    fn display_title(&self, user_id: &str) -> String {
        match self.resolver.profile(user_id) {
            Ok(Some(profile)) => profile.display_name(DIRECT_FALLBACK_TITLE),
            Ok(None) => DIRECT_FALLBACK_TITLE.to_string(),
            Err(e) => {
                warn!("Profile lookup for {} failed: {}", user_id, e);
                DIRECT_FALLBACK_TITLE.to_string()
            }
        }
    }

    /// Create one membership per `(user, role)`. Already-present memberships
    /// are kept as they are.
    fn attach_members(
        &self,
        conversation_id: &str,
        roles: &[(&str, Role)],
        joined_at: DateTime<Utc>,
        permissions: &[PermissionGrant],
    ) -> Result<Vec<Membership>, StoreError> {
        roles
            .iter()
            .map(|(user_id, role)| {
                self.create_membership(conversation_id, user_id, *role, joined_at, permissions)
                    .inspect_err(|e| warn!("Membership write for {} in {} failed: {}", user_id, conversation_id, e))
            })
            .collect()
    }
}

fn summarize(
    conversation: Conversation,
    membership: &Membership,
    user_id: &str,
    title: String,
    other_user_id: Option<UserId>,
) -> ConversationSummary {
    let unread = match (conversation.last_message_at, conversation.last_message_sender_id.as_deref()) {
        (Some(at), Some(sender)) if sender != user_id => membership.last_read_at.is_none_or(|read| at > read),
        _ => false,
    };
    let preview = conversation
        .last_message_text
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| EMPTY_PREVIEW.to_string());

    ConversationSummary {
        id: conversation.id,
        kind: conversation.kind,
        title,
        photo_url: conversation.photo_url,
        other_user_id,
        preview,
        last_message_text: conversation.last_message_text,
        last_message_at: conversation.last_message_at,
        last_message_sender_id: conversation.last_message_sender_id,
        created_at: conversation.created_at,
        last_read_at: membership.last_read_at,
        unread,
        pinned: membership.pinned,
        archived: membership.archived,
    }
}
