use crate::Database;
use crate::models::{CoupleClaim, CoupleInsert, CoupleRow, IdentityRow, StatusRow};
use anyhow::Result;
use rusqlite::{Connection, ErrorCode, Row};
use tandem_types::{Activity, Emotion};

impl Database {
    // -- Identities --

    /// Insert a new identity. Returns `false` if the email is already registered.
    pub fn create_identity(&self, row: &IdentityRow) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO identities (id, email, password, name, character, couple_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.email,
                    row.password,
                    row.name,
                    row.character,
                    row.couple_id,
                    row.created_at
                ],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_identity_by_id(&self, id: &str) -> Result<Option<IdentityRow>> {
        self.with_conn(|conn| query_identity(conn, "id", id))
    }

    pub fn get_identity_by_email(&self, email: &str) -> Result<Option<IdentityRow>> {
        self.with_conn(|conn| query_identity(conn, "email", email))
    }

    // -- Couples --

    /// Mint a pending couple and attach it to its first member. The paired
    /// check, the pending check, the code check, the insert and the attach
    /// run in one transaction. An existing pending couple is attached
    /// instead of inserting a second one.
    pub fn insert_couple(&self, row: &CoupleRow) -> Result<CoupleInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !identity_exists(&tx, &row.first_member)? {
                return Ok(CoupleInsert::UnknownMember);
            }
            if is_paired(&tx, &row.first_member)? {
                return Ok(CoupleInsert::MemberPaired);
            }
            if let Some(existing) = query_pending_couples(&tx, &row.first_member)?.into_iter().next() {
                attach(&tx, &row.first_member, &existing.id)?;
                tx.commit()?;
                return Ok(CoupleInsert::PendingExists(existing));
            }
            if query_couple(&tx, "invite_code", &row.invite_code)?.is_some() {
                return Ok(CoupleInsert::CodeTaken);
            }

            tx.execute(
                "INSERT INTO couples (id, first_member, second_member, invite_code, created_at, connected_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, NULL)",
                rusqlite::params![row.id, row.first_member, row.invite_code, row.created_at],
            )?;
            attach(&tx, &row.first_member, &row.id)?;
            tx.commit()?;
            Ok(CoupleInsert::Inserted)
        })
    }

    pub fn get_couple(&self, id: &str) -> Result<Option<CoupleRow>> {
        self.with_conn(|conn| query_couple(conn, "id", id))
    }

    pub fn get_couple_by_code(&self, invite_code: &str) -> Result<Option<CoupleRow>> {
        self.with_conn(|conn| query_couple(conn, "invite_code", invite_code))
    }

    pub fn get_pending_couples(&self, first_member: &str) -> Result<Vec<CoupleRow>> {
        self.with_conn(|conn| query_pending_couples(conn, first_member))
    }

    /// Complete a pending couple with `member` as second member. In one
    /// transaction: refuse if `member` already belongs to a completed
    /// couple, set the second member only while it is still unset, delete
    /// `member`'s own pending couples and attach the couple to `member`.
    /// Only one joiner can win a given couple.
    pub fn claim_couple(&self, id: &str, member: &str, connected_at: i64) -> Result<CoupleClaim> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !identity_exists(&tx, member)? {
                return Ok(CoupleClaim::UnknownMember);
            }
            if is_paired(&tx, member)? {
                return Ok(CoupleClaim::MemberPaired);
            }

            let n = tx.execute(
                "UPDATE couples SET second_member = ?2, connected_at = ?3
                 WHERE id = ?1 AND second_member IS NULL AND first_member != ?2",
                rusqlite::params![id, member, connected_at],
            )?;
            if n == 0 {
                return Ok(CoupleClaim::Taken);
            }

            let pruned: Vec<String> = query_pending_couples(&tx, member)?
                .into_iter()
                .map(|c| c.id)
                .collect();
            tx.execute(
                "DELETE FROM couples WHERE first_member = ?1 AND second_member IS NULL",
                [member],
            )?;
            attach(&tx, member, id)?;

            let couple = query_couple(&tx, "id", id)?
                .ok_or_else(|| anyhow::anyhow!("claimed couple {} vanished", id))?;
            tx.commit()?;
            Ok(CoupleClaim::Claimed { couple, pruned })
        })
    }

    // -- Statuses --

    pub fn get_status(&self, owner_id: &str) -> Result<Option<StatusRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT owner_id, activity, emotion, message, updated_at
                 FROM statuses WHERE owner_id = ?1",
            )?;
            let row = stmt.query_row([owner_id], status_from_row).optional()?;
            Ok(row)
        })
    }

    /// Upsert with merge semantics: `None` fields keep the stored value (or
    /// the neutral default on first insert). The stamp never goes backwards:
    /// it is at least one millisecond past the previous write.
    pub fn upsert_status(
        &self,
        owner_id: &str,
        activity: Option<&str>,
        emotion: Option<&str>,
        message: Option<&str>,
        now: i64,
    ) -> Result<StatusRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO statuses (owner_id, activity, emotion, message, updated_at)
                 VALUES (?1, COALESCE(?2, ?6), COALESCE(?3, ?7), COALESCE(?4, ''), ?5)
                 ON CONFLICT(owner_id) DO UPDATE SET
                     activity = COALESCE(?2, statuses.activity),
                     emotion = COALESCE(?3, statuses.emotion),
                     message = COALESCE(?4, statuses.message),
                     updated_at = MAX(?5, statuses.updated_at + 1)
                 RETURNING owner_id, activity, emotion, message, updated_at",
                rusqlite::params![
                    owner_id,
                    activity,
                    emotion,
                    message,
                    now,
                    Activity::default().as_str(),
                    Emotion::default().as_str()
                ],
                status_from_row,
            )?;
            Ok(row)
        })
    }

    /// Create the neutral status for `owner_id` unless one exists.
    /// Returns the created row, or `None` if a status was already there.
    pub fn insert_default_status(&self, owner_id: &str, now: i64) -> Result<Option<StatusRow>> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO statuses (owner_id, activity, emotion, message, updated_at)
                 VALUES (?1, ?2, ?3, '', ?4)",
                rusqlite::params![
                    owner_id,
                    Activity::default().as_str(),
                    Emotion::default().as_str(),
                    now
                ],
            )?;
            if n == 0 {
                return Ok(None);
            }
            Ok(Some(StatusRow {
                owner_id: owner_id.to_string(),
                activity: Activity::default().as_str().to_string(),
                emotion: Emotion::default().as_str().to_string(),
                message: String::new(),
                updated_at: now,
            }))
        })
    }
}

fn query_identity(conn: &Connection, column: &str, value: &str) -> Result<Option<IdentityRow>> {
    let sql = format!(
        "SELECT id, email, password, name, character, couple_id, created_at
         FROM identities WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(IdentityRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                name: row.get(3)?,
                character: row.get(4)?,
                couple_id: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn identity_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM identities WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Whether `member` belongs to a completed couple on either side.
fn is_paired(conn: &Connection, member: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM couples
             WHERE second_member IS NOT NULL AND (first_member = ?1 OR second_member = ?1)
             LIMIT 1",
            [member],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn attach(conn: &Connection, member: &str, couple_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE identities SET couple_id = ?2 WHERE id = ?1",
        (member, couple_id),
    )?;
    Ok(())
}

fn query_couple(conn: &Connection, column: &str, value: &str) -> Result<Option<CoupleRow>> {
    let sql = format!(
        "SELECT id, first_member, second_member, invite_code, created_at, connected_at
         FROM couples WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], couple_from_row).optional()?;
    Ok(row)
}

fn query_pending_couples(conn: &Connection, first_member: &str) -> Result<Vec<CoupleRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_member, second_member, invite_code, created_at, connected_at
         FROM couples
         WHERE first_member = ?1 AND second_member IS NULL
         ORDER BY created_at DESC",
    )?;

    let rows = stmt
        .query_map([first_member], couple_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn couple_from_row(row: &Row<'_>) -> rusqlite::Result<CoupleRow> {
    Ok(CoupleRow {
        id: row.get(0)?,
        first_member: row.get(1)?,
        second_member: row.get(2)?,
        invite_code: row.get(3)?,
        created_at: row.get(4)?,
        connected_at: row.get(5)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok(StatusRow {
        owner_id: row.get(0)?,
        activity: row.get(1)?,
        emotion: row.get(2)?,
        message: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
