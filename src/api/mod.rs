//! Purpose: Define the public client surface for the configuration service.
//! Exports: Client, options, setting types, errors, and the decode entry points.
//! Role: Stable boundary used by the `kvconfig` CLI and tests; hides request plumbing.
//! Invariants: Everything here is reachable without naming `core` or `pipeline` internals.
//! Invariants: Additions only; removing a re-export is a breaking change.

mod client;
mod continuation;
mod read;

pub use crate::core::buffer::{BufferPool, DEFAULT_BUFFER_SIZE, PooledBuffer};
pub use crate::core::decode::{Decoded, decode_batch, decode_setting};
pub use crate::core::encode::{encode_setting, encoded_len};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::field::{FieldTag, classify};
pub use crate::core::setting::{ConfigurationSetting, SettingBatch};
pub use client::{ClientOptions, ConfigurationClient, ListOptions};
pub use continuation::{next_after, parse_after};
pub use read::{DEFAULT_MAX_DOCUMENT_BYTES, parse_batch, parse_setting, read_body};
