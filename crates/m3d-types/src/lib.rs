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

//! Core data structures and error types for the mesh pipeline kernel.

pub mod config;
pub mod credit;
pub mod error;
pub mod pipeline;

pub use credit::{CreditTransaction, TransactionType, UserAccount};
pub use error::{ApiError, ApiErrorCode, ErrorCode};
pub use pipeline::*;
