#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]
#![forbid(unsafe_code)]

//! C1 credit ledger: atomic debit/credit of a per-user integer balance with
//! an append-only transaction log, backed by any `DocStore` implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use m3d_api::doc_store::{AccountMutation, DocStore};
use m3d_api::ledger::CreditLedger;
use m3d_types::credit::{CreditTransaction, TransactionType};
use m3d_types::error::LedgerError;
use m3d_types::pipeline::UserId;

pub struct DocStoreLedger {
    store: Arc<dyn DocStore>,
}

impl DocStoreLedger {
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self { store }
    }

    fn map_store_err(err: m3d_types::error::StoreError, user_id: &str) -> LedgerError {
        match err {
            m3d_types::error::StoreError::NotFound(_) => LedgerError::NotFound(user_id.to_string()),
            other => LedgerError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
impl CreditLedger for DocStoreLedger {
    async fn has_credits(&self, user_id: &str, amount: i64) -> Result<bool, LedgerError> {
        let account = self
            .store
            .get_account(user_id)
            .await
            .map_err(|e| Self::map_store_err(e, user_id))?;
        Ok(account.credits >= amount)
    }

    async fn deduct_credits(
        &self,
        user_id: &str,
        amount: i64,
        job_id: &str,
    ) -> Result<(), LedgerError> {
        let account = self
            .store
            .get_account(user_id)
            .await
            .map_err(|e| Self::map_store_err(e, user_id))?;
        if account.credits < amount {
            return Err(LedgerError::InsufficientCredits {
                user: user_id.to_string(),
                balance: account.credits,
                needed: amount,
            });
        }

        let tx = CreditTransaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: TransactionType::Consume,
            amount: -amount,
            job_id: job_id.to_string(),
            created_at: Utc::now(),
        };

        self.store
            .apply_account_mutation(user_id, AccountMutation::AdjustCredits(-amount), Some(tx))
            .await
            .map_err(|e| Self::map_store_err(e, user_id))?;

        tracing::info!(
            target: "ledger",
            user_id,
            job_id,
            amount,
            "debited credits"
        );
        Ok(())
    }

    async fn refund_credits(
        &self,
        user_id: &str,
        amount: i64,
        job_id: &str,
    ) -> Result<(), LedgerError> {
        let tx = CreditTransaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: TransactionType::Refund,
            amount,
            job_id: job_id.to_string(),
            created_at: Utc::now(),
        };

        self.store
            .apply_account_mutation(user_id, AccountMutation::AdjustCredits(amount), Some(tx))
            .await
            .map_err(|e| Self::map_store_err(e, user_id))?;

        tracing::info!(
            target: "ledger",
            user_id,
            job_id,
            amount,
            "refunded credits"
        );
        Ok(())
    }

    async fn increment_generation_count(&self, user_id: &str) -> Result<(), LedgerError> {
        self.store
            .apply_account_mutation(user_id, AccountMutation::IncrementGenerationCount, None)
            .await
            .map_err(|e| Self::map_store_err(e, user_id))?;
        Ok(())
    }

    async fn balance(&self, user_id: &UserId) -> Result<i64, LedgerError> {
        let account = self
            .store
            .get_account(user_id)
            .await
            .map_err(|e| Self::map_store_err(e, user_id))?;
        Ok(account.credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m3d_storage::MemoryDocStore;

    #[tokio::test]
    async fn p1_credit_conservation_debit_then_refund() {
        let mem = Arc::new(MemoryDocStore::new());
        mem.seed_account("u1", 100).await;
        let store: Arc<dyn DocStore> = mem;
        let ledger = DocStoreLedger::new(store.clone());

        ledger.deduct_credits("u1", 5, "job1").await.unwrap();
        assert_eq!(ledger.balance(&"u1".to_string()).await.unwrap(), 95);

        ledger.refund_credits("u1", 5, "job1").await.unwrap();
        assert_eq!(ledger.balance(&"u1".to_string()).await.unwrap(), 100);

        let txs = store.list_transactions("job1").await.unwrap();
        assert_eq!(txs.iter().map(|t| t.amount).sum::<i64>(), 0);
    }

    #[tokio::test]
    async fn insufficient_credits_rejected_without_mutation() {
        let mem = Arc::new(MemoryDocStore::new());
        mem.seed_account("u1", 2).await;
        let store: Arc<dyn DocStore> = mem;
        let ledger = DocStoreLedger::new(store.clone());

        let err = ledger.deduct_credits("u1", 5, "job1").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits { .. }));
        assert_eq!(ledger.balance(&"u1".to_string()).await.unwrap(), 2);
    }
}
