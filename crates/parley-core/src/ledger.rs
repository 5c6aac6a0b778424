//! Membership ledger: who belongs to which conversation, and the permission
//! grants derived from that.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parley_types::models::{Membership, MembershipStatus, Role, UserId, collections::MEMBERSHIPS};
use parley_types::permissions::{Capability, PermissionGrant};
use parley_types::store::{DocumentStore, Filter, IdentityResolver, ListQuery, StoreError, encode};
use serde_json::json;
use tracing::{debug, warn};

use crate::{ChatError, Engine, derived_key, fields};

/// Read + update for every member, plus delete for `admin` when the admin is
/// itself a member. Sorted and free of duplicates.
pub fn derive_permissions<'a, I>(members: I, admin: Option<&str>) -> Vec<PermissionGrant>
where
    I: IntoIterator<Item = &'a UserId>,
{
    let mut grants = BTreeSet::new();
    let mut admin_is_member = false;

    for member in members {
        grants.insert(PermissionGrant::user(member.clone(), Capability::Read));
        grants.insert(PermissionGrant::user(member.clone(), Capability::Update));
        admin_is_member |= admin == Some(member.as_str());
    }
    if let (Some(admin), true) = (admin, admin_is_member) {
        grants.insert(PermissionGrant::user(admin, Capability::Delete));
    }

    grants.into_iter().collect()
}

/// Store key for the membership of `user_id` in `conversation_id`. Keying on
/// the pair makes the store reject a second membership for it.
pub fn membership_key(conversation_id: &str, user_id: &str) -> String {
    derived_key("m_", &[conversation_id, user_id])
}

impl<S: DocumentStore, R: IdentityResolver> Engine<S, R> {
    /// Fails closed: a store error reads as "not a member".
    pub fn is_member(&self, conversation_id: &str, user_id: &str) -> bool {
        match self.find_membership(conversation_id, user_id) {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!("Membership check for {} in {} failed, denying: {}", user_id, conversation_id, e);
                false
            }
        }
    }

    pub fn find_membership(&self, conversation_id: &str, user_id: &str) -> Result<Option<Membership>, ChatError> {
        let query = ListQuery::new(1)
            .filter(Filter::eq("conversationId", conversation_id))
            .filter(Filter::eq("userId", user_id))
            .filter(Filter::eq("status", MembershipStatus::Active.as_str()));

        let page = self.store.list(MEMBERSHIPS, &query)?;
        match page.documents.first() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// The caller's membership, or `deny(conversation_id)`. Store errors deny
    /// as well, the same way `is_member` does.
    pub(crate) fn membership_or_deny(
        &self,
        conversation_id: &str,
        user_id: &str,
        deny: fn(String) -> ChatError,
    ) -> Result<Membership, ChatError> {
        match self.find_membership(conversation_id, user_id) {
            Ok(Some(membership)) => Ok(membership),
            Ok(None) => Err(deny(conversation_id.to_string())),
            Err(e) => {
                warn!("Membership check for {} in {} failed, denying: {}", user_id, conversation_id, e);
                Err(deny(conversation_id.to_string()))
            }
        }
    }

    /// All active members, paging through the store as needed.
    pub fn members_of(&self, conversation_id: &str) -> Result<BTreeSet<UserId>, ChatError> {
        let query = ListQuery::default()
            .filter(Filter::eq("conversationId", conversation_id))
            .filter(Filter::eq("status", MembershipStatus::Active.as_str()));

        self.list_all(MEMBERSHIPS, query)?
            .iter()
            .map(|doc| doc.decode::<Membership>().map(|m| m.user_id).map_err(ChatError::from))
            .collect()
    }

    /// Every active membership held by `user_id`.
    pub fn memberships_of_user(&self, user_id: &str) -> Result<Vec<Membership>, ChatError> {
        let query = ListQuery::default()
            .filter(Filter::eq("userId", user_id))
            .filter(Filter::eq("status", MembershipStatus::Active.as_str()));

        self.list_all(MEMBERSHIPS, query)?
            .iter()
            .map(|doc| doc.decode().map_err(ChatError::from))
            .collect()
    }

    /// Insert a membership under its pair key. If the pair already has one,
    /// that existing record is returned unchanged.
    pub fn create_membership(
        &self,
        conversation_id: &str,
        user_id: &str,
        role: Role,
        joined_at: DateTime<Utc>,
        permissions: &[PermissionGrant],
    ) -> Result<Membership, StoreError> {
        let key = membership_key(conversation_id, user_id);
        let record = Membership {
            id: key.clone(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            role,
            status: MembershipStatus::Active,
            joined_at,
            last_read_at: None,
            pinned: false,
            archived: false,
        };

        match self.store.create(MEMBERSHIPS, Some(&key), encode(&record)?, permissions) {
            Ok(doc) => doc.decode(),
            Err(StoreError::Conflict { .. }) => {
                debug!("Membership {} already present for {} in {}", key, user_id, conversation_id);
                self.store.get(MEMBERSHIPS, &key)?.decode()
            }
            Err(e) => Err(e),
        }
    }

    pub fn touch_last_read(&self, membership_id: &str, at: DateTime<Utc>) -> Result<Membership, ChatError> {
        let doc = self
            .store
            .update(MEMBERSHIPS, membership_id, fields(json!({ "lastReadAt": at })))?;
        Ok(doc.decode()?)
    }
}
