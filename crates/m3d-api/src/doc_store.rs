//! DocStore interface (§1, §6): transactional get/update/increment on typed
//! records. Out of scope as a concrete distributed document database, but the
//! trait is the single seam the ledger (C1) and the pipeline state machine
//! (C5) use for persistence, so both can be driven against an in-memory
//! reference implementation in tests.

use async_trait::async_trait;
use m3d_types::credit::{CreditTransaction, UserAccount};
use m3d_types::error::StoreError;
use m3d_types::pipeline::{Pipeline, PipelineStatus};

/// A mutation applied to a `UserAccount` inside a single transaction.
pub enum AccountMutation {
    /// Atomically add (possibly negative) to `credits`; fails the whole
    /// transaction if the result would go negative.
    AdjustCredits(i64),
    IncrementGenerationCount,
}

#[async_trait]
pub trait DocStore: Send + Sync {
    /// Fetches a user account, creating a zero-balance record is NOT implied;
    /// returns `NotFound` if the account does not exist.
    async fn get_account(&self, user_id: &str) -> Result<UserAccount, StoreError>;

    /// Applies `mutation` to the account and appends `transaction` to the
    /// ledger, atomically, returning the account's balance after the mutation.
    /// `transaction` is ignored (no row appended) for `IncrementGenerationCount`.
    async fn apply_account_mutation(
        &self,
        user_id: &str,
        mutation: AccountMutation,
        transaction: Option<CreditTransaction>,
    ) -> Result<i64, StoreError>;

    async fn list_transactions(&self, job_id: &str) -> Result<Vec<CreditTransaction>, StoreError>;

    async fn get_pipeline(&self, id: &str) -> Result<Pipeline, StoreError>;

    /// Inserts a brand-new pipeline record; fails if `id` already exists.
    async fn create_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError>;

    /// Replaces the stored pipeline with `pipeline`, provided the stored
    /// record's `version` still equals `expected_version` (§5 optimistic
    /// concurrency check). Returns `Conflict` otherwise so the caller can
    /// retry once, per §5.
    async fn update_pipeline(
        &self,
        pipeline: Pipeline,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    async fn list_pipelines(
        &self,
        user_id: &str,
        status: Option<PipelineStatus>,
        limit: usize,
    ) -> Result<Vec<Pipeline>, StoreError>;
}
