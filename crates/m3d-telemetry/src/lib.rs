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

//! Observability plumbing for the mesh pipeline kernel: structured logging
//! and Prometheus metrics.

pub mod init;
pub mod metrics;

pub use init::init_tracing;
pub use metrics::{install as install_metrics, Metrics};
