//! Incremental metadata harvesting over OAI-PMH.
//!
//! [`SyncEngine::sync_metadata`] walks `ListRecords` pages as an explicit
//! state machine:
//!
//! ```text
//! START -> FETCHING(token) -> FETCHING(next) | DONE
//! ```
//!
//! Papers are committed in batches together with the resumption token that
//! reproduces them, so an interrupted harvest resumes from its last committed
//! batch and re-reads at most one page.

mod engine;
mod oai;
mod record;

pub(crate) use engine::call_with_retry;
pub use engine::{DEFAULT_BATCH_SIZE, SyncEngine, SyncOptions, SyncProgressFn, SyncReport};
pub use oai::{
    DEFAULT_OAI_BASE_URL, ListRecordsPage, ListRecordsRequest, METADATA_PREFIX, MetadataSource,
    OaiClient, OaiError, SyncFilter,
};
pub use record::{ArxivMetadata, RemoteRecord};
