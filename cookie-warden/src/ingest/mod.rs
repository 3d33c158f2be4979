//! Polling ingestion.
//!
//! A [`PollingIngester`] fetches one page from a [`ContentSource`] per jittered
//! tick, walks it lazily, and forwards every new or edited item to the archive
//! and the notifier exactly once per version.

pub mod archive;
pub mod ingester;
pub mod item;
pub mod platforms;
pub mod source;
pub mod ticker;

pub use archive::{ContentArchive, JsonFileArchive, NullArchive};
pub use ingester::{PollingIngester, TickReport};
pub use item::ContentItem;
pub use source::{ContentSource, FetchError, PageItems};
pub use ticker::JitteredTicker;
