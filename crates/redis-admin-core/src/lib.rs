//! Redis Admin Core - key record model, configuration and value decoding
//!
//! This crate holds everything about browsing a Redis keyspace that does not
//! need a live server:
//!
//! - `AdminConfig` / `ServerSpec` - the configuration surface
//! - `KeyRecord` / `KeyType` / `RawValue` - one key as an admin row
//! - `DecoderSettings` / `DecodedValue` - per-type value decoding
//! - `Lookup` - key filters and their glob rewrite
//! - `AdminError` - the shared error type

mod config;
mod decode;
mod error;
mod lookup;
mod record;

pub use config::*;
pub use decode::*;
pub use error::*;
pub use lookup::*;
pub use record::*;
