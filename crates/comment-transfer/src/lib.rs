//! Comment transfer library.
//!
//! Talks to the external asset platform and writes relocated comments:
//! - [`AssetApi`] seam with an HTTP implementation and immutable sessions
//! - Batched, rate-limited comment creation with per-item failure isolation

pub mod api;
pub mod batcher;
pub mod error;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use api::{AssetApi, HttpAssetClient, NewComment, Session};
pub use batcher::{transfer, TransferOptions, TransferOutcome, TransferStatus, TransferSummary};
pub use error::{ApiError, Result};
