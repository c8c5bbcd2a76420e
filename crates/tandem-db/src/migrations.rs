use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("DB: running migration v1 (identities, couples, statuses)");
        conn.execute_batch(
            "
            CREATE TABLE identities (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                name        TEXT NOT NULL,
                character   TEXT NOT NULL,
                couple_id   TEXT,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE couples (
                id              TEXT PRIMARY KEY,
                first_member    TEXT NOT NULL REFERENCES identities(id),
                second_member   TEXT REFERENCES identities(id),
                invite_code     TEXT NOT NULL UNIQUE,
                created_at      INTEGER NOT NULL,
                connected_at    INTEGER
            );

            -- At most one pending invite per identity
            CREATE UNIQUE INDEX idx_couples_one_pending
                ON couples(first_member) WHERE second_member IS NULL;

            CREATE INDEX idx_couples_second_member
                ON couples(second_member);

            CREATE TABLE statuses (
                owner_id    TEXT PRIMARY KEY REFERENCES identities(id),
                activity    TEXT NOT NULL,
                emotion     TEXT NOT NULL,
                message     TEXT NOT NULL DEFAULT '',
                updated_at  INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
