use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::AppStateInner;
use parley_db::Database;

/// Entry in the user directory seed file.
#[derive(Debug, Deserialize)]
struct SeedUser {
    id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let users_file = std::env::var("PARLEY_USERS_FILE").ok().map(PathBuf::from);
    let allow_body_user_id = std::env::var("PARLEY_ALLOW_BODY_USER_ID")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    if let Some(path) = users_file {
        seed_users(&db, &path)?;
    }

    if allow_body_user_id {
        info!("Accepting userId from request bodies when the identity header is absent");
    }

    let app = parley_api::router(AppStateInner::new(db, allow_body_user_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn seed_users(db: &Database, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let users: Vec<SeedUser> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    for user in &users {
        db.upsert_user(&user.id, &user.email, user.name.as_deref())?;
    }
    info!("Seeded {} users from {}", users.len(), path.display());
    Ok(())
}
