#![warn(clippy::unwrap_used)]

//! Two-tier attribution storage: [`LocalCache`] (L1, in-process) in front of
//! a [`DurableStorage`] backend (L2, cookie jar or local storage).

pub mod durable;
pub mod local;

pub use durable::{build_storage, CookieStorage, DurableStorage, LocalStorage, StorageError};
pub use local::LocalCache;
