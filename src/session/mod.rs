//! Session store, fetcher, and retry/backoff controller

mod fetcher;
mod retry;
mod store;
mod types;

pub use fetcher::{HttpSessionFetcher, SessionFetcher};
pub use store::SessionStore;
pub use types::{
    AuthSession, Outage, OutageNotice, SessionSnapshot, SessionStatus, SessionUser, StorageMode,
};
