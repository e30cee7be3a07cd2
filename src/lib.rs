//! Per-key value views over a map-backed multi-valued store.
//!
//! A [`View`] mirrors the values stored under one key of a [`KeyStore`] and
//! keeps the store entry consistent as values come and go: the first insert
//! installs the backing collection under the key, removing the last value
//! evicts it, and an emptied view transparently re-attaches to whatever the
//! store holds for its key. Derived sub-range views and [`Cursor`]s detect
//! wholesale replacement of their backing collection and fail fast with
//! [`ViewError::Stale`] instead of reading stale data.

pub use backing::{shared, Backing, Shared};
pub use error::ViewError;
pub use store::{HashStore, KeyStore};
pub use view::{Cursor, View};

mod backing;
mod error;
mod store;
mod view;
