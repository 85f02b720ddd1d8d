//! Request-Queuing caching tree: mediates between a local file-sharing
//! protocol server and a remote HTTP JSON/asset content API, presenting one
//! overlay view of "remote ∪ locally cached ∪ locally pending" while a
//! durable, coalescing queue drains pending mutations back to the remote in
//! the background.
//!
//! The crate is organized around two small, object-safe traits —
//! [`backend::RemoteBackend`] and [`backend::LocalBackend`] — so every other
//! module is generic over the backend pair and can be exercised against the
//! in-memory doubles in [`testing`] without a live server or disk.

pub mod backend;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod http_remote;
pub mod list_cache;
pub mod overlay;
pub mod path;
pub mod path_lock;
pub mod queue;
pub mod sync_processor;
pub mod testing;
pub mod uploader;
pub mod work_file;

pub use backend::{EntryMeta, LocalBackend, RemoteBackend, UploadChunk};
pub use config::ShareConfig;
pub use error::{Result, RqError};
pub use events::{CallbackRegistry, ShareEvent, SubscriptionId};
pub use overlay::{FileEntry, OverlayTree, Origin, ShareContext};
pub use queue::{Method, QueueEntry, QueueOp, RequestQueue};
pub use sync_processor::SyncProcessor;
pub use uploader::{CancelCheck, UploadSettings, Uploader};
