//! # txlog providers
//!
//! Built-in [`Encoding`](txlog_core::Encoding) and
//! [`Encryption`](txlog_core::Encryption) implementations.
//!
//! | Key        | Kind       | Provider             |
//! |------------|------------|----------------------|
//! | `binaryl`  | encoding   | [`BinaryEncoding`] (little-endian) |
//! | `binaryb`  | encoding   | [`BinaryEncoding`] (big-endian) |
//! | `msgpack`  | encoding   | [`MsgpackEncoding`]  |
//! | `none`     | encryption | [`NoneEncryption`]   |
//! | `chacha20` | encryption | [`ChaChaEncryption`] |

use std::sync::Arc;

use tracing::debug;
use txlog_core::{ProviderRegistry, ProviderResult};

pub mod binary;
pub mod chacha;
pub mod msgpack;
pub mod none;

pub use binary::{BINARY_BIG_KEY, BINARY_LITTLE_KEY, BinaryEncoding, Endian};
pub use chacha::{CHACHA_KEY, ChaChaEncryption};
pub use msgpack::{MSGPACK_KEY, MsgpackEncoding};
pub use none::{NONE_KEY, NoneEncryption};

/// Registry with every built-in provider that needs no key material.
///
/// New records are written as msgpack with no encryption.
pub fn default_registry() -> ProviderResult<ProviderRegistry> {
    let registry = ProviderRegistry::builder()
        .encoding(Arc::new(MsgpackEncoding))
        .encoding(Arc::new(BinaryEncoding::little()))
        .encoding(Arc::new(BinaryEncoding::big()))
        .encryption(Arc::new(NoneEncryption))
        .default_encoding(MSGPACK_KEY)
        .default_encryption(NONE_KEY)
        .build()?;
    debug!(?registry, "Default provider registry ready");
    Ok(registry)
}
