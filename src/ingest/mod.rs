//! Log ingestion: backfill of archived logs and tailing of the live log.

mod backfill;
mod decompress;
mod driver;
mod error;
mod observer;
mod shared;

pub use backfill::{backfill, live_baseline, BackfillOptions, BackfillSummary};
pub use decompress::gunzip_bounded;
pub use driver::IngestDriver;
pub use error::IngestError;
pub use observer::{IngestObserver, IngestedFiles};
pub use shared::{IngestState, SharedIngest};
