//! Per-symbol version chains.
//!
//! A chain is an append-only sequence of immutable [`VersionRecord`]s
//! numbered from 0. Reads address a version through a [`VersionSelector`];
//! the manager resolves `latest`, exact and `as_of` selectors, while snapshot
//! selectors are resolved by the store through the snapshot registry.

mod locks;
pub(crate) mod manager;
pub mod record;
/// Read-side version selectors.
pub mod selector;

pub use record::{DataRef, VersionRecord};
pub use selector::VersionSelector;
