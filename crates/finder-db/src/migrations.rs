use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, cases, contacts)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                full_name   TEXT NOT NULL,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE cases (
                id                  TEXT PRIMARY KEY,
                reporter_id         TEXT NOT NULL REFERENCES users(id),
                name                TEXT NOT NULL CHECK (name <> ''),
                age                 INTEGER NOT NULL CHECK (age >= 0),
                gender              TEXT NOT NULL CHECK (gender IN ('male', 'female', 'other')),
                height_cm           REAL NOT NULL,
                weight_kg           REAL NOT NULL,
                hair_color          TEXT NOT NULL,
                eye_color           TEXT NOT NULL,
                last_seen_date      TEXT NOT NULL,
                last_seen_location  TEXT NOT NULL,
                description         TEXT NOT NULL,
                photo_url           TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'missing'
                                    CHECK (status IN ('missing', 'found')),
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_cases_status_created
                ON cases(status, created_at);

            CREATE TABLE contacts (
                id            TEXT PRIMARY KEY,
                case_id       TEXT NOT NULL UNIQUE REFERENCES cases(id) ON DELETE CASCADE,
                contact_name  TEXT NOT NULL CHECK (contact_name <> ''),
                relationship  TEXT NOT NULL CHECK (relationship <> ''),
                phone         TEXT NOT NULL CHECK (phone <> ''),
                email         TEXT NOT NULL CHECK (email <> ''),
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
