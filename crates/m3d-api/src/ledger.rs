//! C1 credit ledger interface.

use async_trait::async_trait;
use m3d_types::error::LedgerError;
use m3d_types::pipeline::UserId;

/// Atomic debit/credit of a per-user integer balance with an append-only
/// transaction log (§4.1). Every public call must execute in a single
/// transaction over the user record and the transaction collection.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Read-only check; does not mutate state.
    async fn has_credits(&self, user_id: &str, amount: i64) -> Result<bool, LedgerError>;

    /// Verifies balance >= amount, decrements by amount, appends a `consume`
    /// row with `amount = -amount`. Fails with `InsufficientCredits` if under
    /// balance, `NotFound` if the user is missing.
    async fn deduct_credits(
        &self,
        user_id: &str,
        amount: i64,
        job_id: &str,
    ) -> Result<(), LedgerError>;

    /// Increments balance by amount, appends a `refund` row with
    /// `amount = +amount`. Idempotency is the caller's responsibility.
    async fn refund_credits(
        &self,
        user_id: &str,
        amount: i64,
        job_id: &str,
    ) -> Result<(), LedgerError>;

    /// Atomic counter bump, analytics only.
    async fn increment_generation_count(&self, user_id: &str) -> Result<(), LedgerError>;

    /// Current balance, used by tests and the command API's read paths.
    async fn balance(&self, user_id: &UserId) -> Result<i64, LedgerError>;
}
