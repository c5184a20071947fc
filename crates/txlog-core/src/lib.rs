//! # txlog core
//!
//! The transaction record codec and the provider abstractions shared by the
//! rest of the workspace.
//!
//! ## Features
//!
//! - **Transaction**: versioned, length-prefixed binary log record
//! - **TransactionPool**: bounded acquire/release pool for hot-path records
//! - **Encoding / Encryption**: pluggable payload transforms selected by an
//!   8-byte [`ProviderKey`]
//! - **ProviderRegistry**: validated key → provider lookup
//!
//! ## Example
//!
//! ```rust
//! use txlog_core::{Action, ProviderKey, Transaction, TransactionId};
//!
//! let tx = Transaction::new(TransactionId::Counter(0), Action::Add)
//!     .with_keys(
//!         ProviderKey::new([0, 1, 2, 3, 4, 5, 6, 7]),
//!         ProviderKey::new([8, 9, 10, 11, 12, 13, 14, 15]),
//!     )
//!     .with_payload(&[16, 17, 18]);
//!
//! let encoded = tx.encode();
//! assert_eq!(encoded.len(), 8 + 25 + 3);
//! assert_eq!(Transaction::decode_legacy(&encoded).unwrap(), tx);
//! ```

pub mod action;
pub mod error;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod transaction;

pub use action::Action;
pub use error::{CodecError, CodecResult, ProviderError, ProviderResult};
pub use pool::{PooledTransaction, TransactionPool};
pub use provider::{Encoding, Encryption, PROVIDER_KEY_SIZE, ProviderKey, Value, ValueKind};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
pub use transaction::{
    FORMAT_VERSION_1, LENGTH_PREFIX_SIZE, Layout, Transaction, TransactionId, WireFormat,
};
