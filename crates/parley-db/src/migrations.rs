use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (documents + users)");
        conn.execute_batch(
            "
            CREATE TABLE documents (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                collection      TEXT NOT NULL,
                id              TEXT NOT NULL,
                fields          TEXT NOT NULL,
                permissions     TEXT NOT NULL DEFAULT '[]',
                created_at      TEXT NOT NULL,
                UNIQUE(collection, id)
            );

            CREATE INDEX idx_memberships_user
                ON documents(json_extract(fields, '$.userId'))
                WHERE collection = 'memberships';

            CREATE INDEX idx_memberships_conversation
                ON documents(json_extract(fields, '$.conversationId'))
                WHERE collection = 'memberships';

            CREATE INDEX idx_messages_conversation
                ON documents(json_extract(fields, '$.conversationId'), seq)
                WHERE collection = 'messages';

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                name        TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
