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

//! Trait interfaces for the mesh pipeline kernel's external collaborators.
//!
//! Mirrors the split between `ioi-api`'s trait-only surface (`StateManager`,
//! `HardwareDriver`, `InferenceRuntime`) and the concrete implementation
//! crates that implement them.

pub mod blob_store;
pub mod doc_store;
pub mod ledger;
pub mod provider;
pub mod vision;

pub use blob_store::BlobStore;
pub use doc_store::{AccountMutation, DocStore};
pub use ledger::CreditLedger;
pub use provider::{MeshDriver, PollResult, RetextureDriver, RetextureOptions, TaskHandle, TaskState};
pub use vision::{AllViewsResult, GeneratedView, ProgressCallback, VisionClient};
