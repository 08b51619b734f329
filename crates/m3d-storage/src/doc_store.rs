//! In-process reference implementation of the `DocStore` trait.
//!
//! The real deployment's DocStore is an external, transactional document
//! database (§1 Non-goals); this adapter gives the pipeline engine and its
//! tests a working collaborator behind the same trait, serializing all
//! mutations through a single async mutex rather than attempting any
//! fine-grained locking.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use m3d_api::doc_store::{AccountMutation, DocStore};
use m3d_types::credit::{CreditTransaction, UserAccount};
use m3d_types::error::StoreError;
use m3d_types::pipeline::{Pipeline, PipelineStatus};

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, UserAccount>,
    transactions: Vec<CreditTransaction>,
    pipelines: HashMap<String, Pipeline>,
}

pub struct MemoryDocStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryDocStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: seed a user's starting balance.
    pub async fn seed_account(&self, user_id: &str, credits: i64) {
        let mut inner = self.inner.lock().await;
        inner.accounts.insert(
            user_id.to_string(),
            UserAccount {
                user_id: user_id.to_string(),
                credits,
                total_generated: 0,
                updated_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn get_account(&self, user_id: &str) -> Result<UserAccount, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .accounts
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("users/{user_id}")))
    }

    async fn apply_account_mutation(
        &self,
        user_id: &str,
        mutation: AccountMutation,
        transaction: Option<CreditTransaction>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("users/{user_id}")))?;

        match mutation {
            AccountMutation::AdjustCredits(delta) => {
                let next = account.credits + delta;
                if next < 0 {
                    return Err(StoreError::Backend(format!(
                        "account {user_id} would go negative ({next})"
                    )));
                }
                account.credits = next;
            }
            AccountMutation::IncrementGenerationCount => {
                account.total_generated += 1;
            }
        }
        account.updated_at = Utc::now();
        let balance = account.credits;

        if let Some(tx) = transaction {
            inner.transactions.push(tx);
        }

        Ok(balance)
    }

    async fn list_transactions(&self, job_id: &str) -> Result<Vec<CreditTransaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn get_pipeline(&self, id: &str) -> Result<Pipeline, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .pipelines
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pipelines/{id}")))
    }

    async fn create_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.pipelines.contains_key(&pipeline.id) {
            return Err(StoreError::Conflict(format!(
                "pipelines/{} already exists",
                pipeline.id
            )));
        }
        inner.pipelines.insert(pipeline.id.clone(), pipeline);
        Ok(())
    }

    async fn update_pipeline(
        &self,
        pipeline: Pipeline,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .pipelines
            .get(&pipeline.id)
            .ok_or_else(|| StoreError::NotFound(format!("pipelines/{}", pipeline.id)))?;
        if existing.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "pipelines/{} version {} != expected {}",
                pipeline.id, existing.version, expected_version
            )));
        }
        let mut next = pipeline;
        next.version = expected_version + 1;
        inner.pipelines.insert(next.id.clone(), next);
        Ok(())
    }

    async fn list_pipelines(
        &self,
        user_id: &str,
        status: Option<PipelineStatus>,
        limit: usize,
    ) -> Result<Vec<Pipeline>, StoreError> {
        let inner = self.inner.lock().await;
        let mut results: Vec<Pipeline> = inner
            .pipelines
            .values()
            .filter(|p| p.user_id == user_id)
            .filter(|p| status.map(|s| s == p.status).unwrap_or(true))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(limit);
        Ok(results)
    }
}
