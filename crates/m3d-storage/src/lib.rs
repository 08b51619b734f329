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

//! Reference `DocStore`/`BlobStore` adapters for the mesh pipeline kernel.

pub mod blob_store;
pub mod doc_store;

pub use blob_store::MemoryBlobStore;
pub use doc_store::MemoryDocStore;

#[cfg(test)]
mod tests {
    use super::*;
    use m3d_api::doc_store::{AccountMutation, DocStore};
    use m3d_api::BlobStore;
    use m3d_types::credit::{CreditTransaction, TransactionType};
    use chrono::Utc;

    #[tokio::test]
    async fn deduct_then_refund_round_trips_balance() {
        let store = MemoryDocStore::new();
        store.seed_account("u1", 100).await;

        let tx = CreditTransaction {
            id: "t1".into(),
            user_id: "u1".into(),
            kind: TransactionType::Consume,
            amount: -5,
            job_id: "job1".into(),
            created_at: Utc::now(),
        };
        let balance = store
            .apply_account_mutation("u1", AccountMutation::AdjustCredits(-5), Some(tx))
            .await
            .unwrap();
        assert_eq!(balance, 95);

        let refund = CreditTransaction {
            id: "t2".into(),
            user_id: "u1".into(),
            kind: TransactionType::Refund,
            amount: 5,
            job_id: "job1".into(),
            created_at: Utc::now(),
        };
        let balance = store
            .apply_account_mutation("u1", AccountMutation::AdjustCredits(5), Some(refund))
            .await
            .unwrap();
        assert_eq!(balance, 100);

        let txs = store.list_transactions("job1").await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs.iter().map(|t| t.amount).sum::<i64>(), 0);
    }

    #[tokio::test]
    async fn deduct_below_zero_is_rejected() {
        let store = MemoryDocStore::new();
        store.seed_account("u1", 3).await;
        let err = store
            .apply_account_mutation("u1", AccountMutation::AdjustCredits(-5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, m3d_types::error::StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn blob_store_round_trips_bytes() {
        let blobs = MemoryBlobStore::default();
        let url = blobs
            .put_bytes("pipelines/u1/p1/mesh.glb", vec![1, 2, 3], "model/gltf-binary")
            .await
            .unwrap();
        assert!(url.contains("pipelines/u1/p1/mesh.glb"));
        let bytes = blobs.get("pipelines/u1/p1/mesh.glb").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
