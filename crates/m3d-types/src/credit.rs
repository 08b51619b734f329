//! §3 `CreditTransaction` — the append-only ledger row shape (C1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Consume,
    Bonus,
    Refund,
    Purchase,
}

/// One immutable row in the credit ledger. Refunds are new rows, never
/// mutations of the original debit (§3 lifecycle note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Signed: negative for debits, positive for credits.
    pub amount: i64,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
}

/// §6 `users/{userId}` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub credits: i64,
    pub total_generated: u64,
    pub updated_at: DateTime<Utc>,
}
