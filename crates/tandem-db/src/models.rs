//! Row types mapping directly onto SQLite rows, kept apart from the
//! tandem-types domain models so the DB layer stays independent.
//! Timestamps are epoch milliseconds.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub name: String,
    pub character: String,
    pub couple_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoupleRow {
    pub id: String,
    pub first_member: String,
    pub second_member: Option<String>,
    pub invite_code: String,
    pub created_at: i64,
    pub connected_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub owner_id: String,
    pub activity: String,
    pub emotion: String,
    pub message: String,
    pub updated_at: i64,
}

/// Result of trying to mint a new pending couple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoupleInsert {
    Inserted,
    /// Another couple already uses this invite code
    CodeTaken,
    /// The first member already holds a pending couple; it was attached
    PendingExists(CoupleRow),
    /// The first member already belongs to a completed couple
    MemberPaired,
    UnknownMember,
}

/// Result of trying to complete a pending couple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoupleClaim {
    /// `pruned` lists the joiner's own pending couples deleted in the same step
    Claimed { couple: CoupleRow, pruned: Vec<String> },
    /// The joiner already belongs to a completed couple
    MemberPaired,
    /// Already completed, missing, or the joiner is its first member
    Taken,
    UnknownMember,
}
