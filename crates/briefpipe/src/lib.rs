//! Public facade crate for `briefpipe`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the provider-agnostic types from `briefpipe-core`.

pub use briefpipe_core::*;
