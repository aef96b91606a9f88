//! Redis side of the keyspace admin
//!
//! Connections are resolved per configured server by [`ConnectionRegistry`]
//! (direct, primary/replica split, or Sentinel discovery). A [`Queryset`]
//! pages through one keyspace over the [`Keyspace`] trait: `SCAN` for names,
//! one pipeline for type/TTL/idle metadata, and one pipeline for values.
//! [`AdminSite`] builds one [`ServerAdmin`] per server for a front end.

mod admin;
#[cfg(test)]
mod admin_tests;
mod client;
#[cfg(test)]
mod client_tests;
pub mod fetcher;
#[cfg(test)]
mod fetcher_tests;
mod keyspace;
#[cfg(test)]
mod keyspace_tests;
#[cfg(test)]
mod mock;
mod queryset;
#[cfg(test)]
mod queryset_tests;

pub use admin::*;
pub use client::*;
pub use fetcher::{DEFAULT_KEY_COUNT, PageWindow};
pub use keyspace::*;
pub use queryset::*;
