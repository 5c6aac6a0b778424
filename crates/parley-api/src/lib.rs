pub mod chat;
pub mod error;
pub mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use parley_core::Engine;
use parley_db::Database;

pub type ChatEngine = Engine<Arc<Database>, Arc<Database>>;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: ChatEngine,
    /// Accept a `userId` body field when the identity header is absent.
    pub allow_body_user_id: bool,
}

impl AppStateInner {
    /// The database serves as both document store and user directory.
    pub fn new(db: Arc<Database>, allow_body_user_id: bool) -> AppState {
        Arc::new(Self {
            engine: Engine::new(db.clone(), db),
            allow_body_user_id,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route("/chat", post(chat::handle))
        .layer(axum_middleware::from_fn(middleware::identify))
        .with_state(state);

    Router::new()
        .route("/health", get(chat::health))
        .merge(chat_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(allow_body_user_id: bool) -> (Router, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_user("alice", "alice@x.com", Some("Alice")).unwrap();
        db.upsert_user("bob", "bob@x.com", Some("Bob")).unwrap();
        (router(AppStateInner::new(db.clone(), allow_body_user_id)), db)
    }

    async fn call(app: &Router, user: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json");
        if let Some(user) = user {
            req = req.header(middleware::USER_ID_HEADER, user);
        }

        let response = app
            .clone()
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn dm_message_roundtrip_over_http() {
        let (app, _db) = app(false);

        let (status, body) = call(&app, Some("alice"), r#"{"action":"createDm","otherEmail":"bob@x.com"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["reused"], json!(false));
        let id = body["conversationId"].as_str().unwrap().to_string();

        let (_, body) = call(&app, Some("bob"), r#"{"action":"createDm","otherEmail":"alice@x.com"}"#).await;
        assert_eq!(body["reused"], json!(true));
        assert_eq!(body["conversationId"], json!(id));

        let send = json!({ "action": "sendMessage", "conversationId": id, "text": "hello" }).to_string();
        let (status, body) = call(&app, Some("alice"), &send).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["status"], json!("sent"));
        assert_eq!(body["message"]["type"], json!("text"));

        let (_, body) = call(&app, Some("bob"), r#"{"action":"listConversations"}"#).await;
        assert_eq!(body["conversations"][0]["title"], json!("Alice"));
        assert_eq!(body["conversations"][0]["lastMessageText"], json!("hello"));
        assert_eq!(body["conversations"][0]["unread"], json!(true));
    }

    #[tokio::test]
    async fn error_codes_and_statuses() {
        let (app, _db) = app(false);

        let (status, body) = call(&app, Some("alice"), r#"{"otherEmail":"bob@x.com"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "ok": false, "error": "MISSING_ACTION", "detail": "request has no action" }));

        let (status, body) = call(&app, Some("alice"), r#"{"action":"nuke"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("UNKNOWN_ACTION"));

        let (status, body) = call(&app, Some("alice"), "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("BAD_REQUEST"));

        let (status, body) = call(&app, None, r#"{"action":"listConversations"}"#).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], json!("UNAUTHORIZED_NO_USER"));

        let (status, body) = call(&app, Some("alice"), r#"{"action":"createDm","otherEmail":"alice@x.com"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("SELF_DM_NOT_ALLOWED"));

        let (status, body) = call(&app, Some("alice"), r#"{"action":"createDm","otherEmail":"zed@x.com"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("USER_NOT_FOUND"));

        let (status, body) =
            call(&app, Some("eve"), r#"{"action":"sendMessage","conversationId":"c1","text":"hi"}"#).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], json!("NOT_A_MEMBER"));

        let long = json!({ "action": "sendMessage", "conversationId": "c1", "text": "x".repeat(2001) }).to_string();
        let (status, body) = call(&app, Some("alice"), &long).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("INVALID_TEXT"));
    }

    #[tokio::test]
    async fn body_user_id_fallback_is_opt_in() {
        let body = r#"{"action":"listConversations","userId":"alice"}"#;

        let (strict, _db) = app(false);
        let (status, _) = call(&strict, None, body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (lenient, _db) = app(true);
        let (status, body) = call(&lenient, None, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "conversations": [] }));
    }

    #[tokio::test]
    async fn health_check() {
        let (app, _db) = app(false);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "ok": true }));
    }
}
