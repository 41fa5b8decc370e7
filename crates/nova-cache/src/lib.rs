//! Lazy values, recoverable text, and small version-keyed caches.
//!
//! - [`LazyValue`]: at-most-one in-flight computation with sync and async
//!   access, cooperative cancellation, and optional memoisation.
//! - [`RetainedText`]: document text that can be spilled to temporary storage
//!   under memory pressure and transparently recovered.
//! - [`SpillQueue`]: the serial background queue spill writes run on.
//! - [`RetainedTextCache`]: LRU bookkeeping of resident texts, registered with
//!   `nova-memory` as the source text evictor.
//! - [`VersionCache`]: keeps the newest few values keyed by [`VersionStamp`].
//!
//! [`VersionStamp`]: nova_core::VersionStamp

mod error;
mod lazy;
mod retained;
mod retained_cache;
mod spill;
mod version_cache;

pub use error::LazyError;
pub use lazy::{AsyncProducer, LazyValue, SyncProducer};
pub use retained::{RetainedText, RetentionContext, RetentionState};
pub use retained_cache::RetainedTextCache;
pub use spill::SpillQueue;
pub use version_cache::{VersionCache, DEFAULT_MAX_VERSIONS};

pub use tokio_util::sync::CancellationToken;
