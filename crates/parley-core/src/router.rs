use chrono::Utc;
use parley_types::api::{ChatRequest, ChatResponse};
use parley_types::models::UserId;
use parley_types::store::{DocumentStore, IdentityResolver};
use tracing::debug;

use crate::{ChatError, Engine};

impl<S: DocumentStore, R: IdentityResolver> Engine<S, R> {
    /// Run one action on behalf of an already-authenticated caller.
    pub fn handle(&self, caller: &str, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        debug!("{} from {}", request.action(), caller);

        match request {
            ChatRequest::CreateDm { other_email } => {
                let other = self.resolve_email(&other_email, "otherEmail")?;
                let created = self.create_direct(caller, &other, caller)?;
                Ok(ChatResponse::Conversation {
                    conversation_id: created.conversation.id.clone(),
                    reused: Some(created.reused),
                    conversation: created.conversation,
                })
            }

            ChatRequest::CreateGroup { title, member_emails, photo_url } => {
                if title.trim().is_empty() {
                    return Err(ChatError::MissingField("title"));
                }
                let members = member_emails
                    .iter()
                    .filter(|email| !email.trim().is_empty())
                    .map(|email| self.resolve_email(email, "memberEmails"))
                    .collect::<Result<Vec<_>, _>>()?;

                let conversation = self.create_group(caller, &title, &members, photo_url)?;
                Ok(ChatResponse::Conversation {
                    conversation_id: conversation.id.clone(),
                    reused: None,
                    conversation,
                })
            }

            ChatRequest::SendMessage { conversation_id, text } => {
                let text = text.ok_or(ChatError::MissingField("text"))?;
                let message = self.send(&conversation_id, caller, &text)?;
                Ok(ChatResponse::Message { message })
            }

            ChatRequest::ListConversations => Ok(ChatResponse::Conversations {
                conversations: self.list_for_user(caller)?,
            }),

            ChatRequest::ListMessages { conversation_id, limit, offset } => {
                let (messages, total) = self.list_messages(&conversation_id, caller, limit, offset)?;
                Ok(ChatResponse::Messages { messages, total })
            }

            ChatRequest::MarkRead { conversation_id } => {
                let membership = self.mark_read(&conversation_id, caller, Utc::now())?;
                Ok(ChatResponse::Read {
                    conversation_id: membership.conversation_id,
                    last_read_at: membership.last_read_at.unwrap_or_else(Utc::now),
                })
            }
        }
    }

    fn resolve_email(&self, email: &str, field: &'static str) -> Result<UserId, ChatError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ChatError::MissingField(field));
        }
        self.resolver
            .resolve_by_email(email)?
            .ok_or_else(|| ChatError::UserNotFound(email.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use parley_types::api::ErrorCode;
    use parley_types::models::Role;

    fn create_dm(engine: &testing::TestEngine, caller: &str, email: &str) -> Result<ChatResponse, ChatError> {
        engine.handle(caller, ChatRequest::CreateDm { other_email: email.into() })
    }

    #[test]
    fn create_dm_resolves_email_and_reuses() {
        let engine = testing::engine();

        let ChatResponse::Conversation { conversation_id, reused, .. } = create_dm(&engine, "alice", "bob@x.com").unwrap()
        else {
            panic!("expected a conversation");
        };
        assert_eq!(reused, Some(false));
        assert_eq!(engine.members_of(&conversation_id).unwrap().len(), 2);

        let ChatResponse::Conversation { conversation_id: again, reused, .. } =
            create_dm(&engine, "bob", "ALICE@x.com").unwrap()
        else {
            panic!("expected a conversation");
        };
        assert_eq!(reused, Some(true));
        assert_eq!(again, conversation_id);
    }

    #[test]
    fn create_dm_errors() {
        let engine = testing::engine();
        assert_eq!(create_dm(&engine, "alice", "").unwrap_err().code(), ErrorCode::MissingField);
        assert_eq!(create_dm(&engine, "alice", "nobody@x.com").unwrap_err().code(), ErrorCode::UserNotFound);
        assert_eq!(create_dm(&engine, "alice", "alice@x.com").unwrap_err().code(), ErrorCode::SelfDmNotAllowed);
        assert!(engine.memberships_of_user("alice").unwrap().is_empty());
    }

    #[test]
    fn create_group_from_emails() {
        let engine = testing::engine();
        let response = engine
            .handle(
                "alice",
                ChatRequest::CreateGroup {
                    title: "Team".into(),
                    member_emails: vec!["bob@x.com".into(), "carol@x.com".into()],
                    photo_url: None,
                },
            )
            .unwrap();
        let ChatResponse::Conversation { conversation_id, reused, .. } = response else {
            panic!("expected a conversation");
        };
        assert_eq!(reused, None);

        let roles: Vec<Role> = ["alice", "bob", "carol"]
            .iter()
            .map(|u| engine.find_membership(&conversation_id, u).unwrap().unwrap().role)
            .collect();
        assert_eq!(roles, vec![Role::Admin, Role::Member, Role::Member]);
    }

    #[test]
    fn create_group_with_unknown_email_writes_nothing() {
        let engine = testing::engine();
        let err = engine
            .handle(
                "alice",
                ChatRequest::CreateGroup {
                    title: "Team".into(),
                    member_emails: vec!["bob@x.com".into(), "ghost@x.com".into()],
                    photo_url: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ChatError::UserNotFound(ref email) if email == "ghost@x.com"));
        assert!(engine.memberships_of_user("alice").unwrap().is_empty());

        let err = engine
            .handle(
                "alice",
                ChatRequest::CreateGroup { title: "".into(), member_emails: vec!["ghost@x.com".into()], photo_url: None },
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingField);
    }

    #[test]
    fn send_list_and_mark_read() {
        let engine = testing::engine();
        let created = engine.create_direct("alice", "bob", "alice").unwrap();
        let id = created.conversation.id;

        let err = engine
            .handle("alice", ChatRequest::SendMessage { conversation_id: id.clone(), text: None })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingField);

        let err = engine
            .handle("alice", ChatRequest::SendMessage { conversation_id: id.clone(), text: Some("   ".into()) })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidText);

        let err = engine
            .handle("eve", ChatRequest::SendMessage { conversation_id: id.clone(), text: Some("hi".into()) })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAMember);

        engine
            .handle("alice", ChatRequest::SendMessage { conversation_id: id.clone(), text: Some("hello".into()) })
            .unwrap();

        let ChatResponse::Messages { messages, total } = engine
            .handle("bob", ChatRequest::ListMessages { conversation_id: id.clone(), limit: None, offset: None })
            .unwrap()
        else {
            panic!("expected messages");
        };
        assert_eq!(total, 1);
        assert_eq!(messages[0].text, "hello");

        let err = engine
            .handle("eve", ChatRequest::ListMessages { conversation_id: id.clone(), limit: None, offset: None })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let ChatResponse::Read { conversation_id, .. } =
            engine.handle("bob", ChatRequest::MarkRead { conversation_id: id.clone() }).unwrap()
        else {
            panic!("expected a read marker");
        };
        assert_eq!(conversation_id, id);

        let ChatResponse::Conversations { conversations } =
            engine.handle("bob", ChatRequest::ListConversations).unwrap()
        else {
            panic!("expected conversations");
        };
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "Alice");
        assert!(!conversations[0].unread);
    }
}
