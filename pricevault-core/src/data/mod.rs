//! Data ingestion and partitioned storage

pub mod circuit_breaker;
pub mod download;
pub mod gaps;
pub mod index;
pub mod ingest;
pub mod pacing;
pub mod provider;
pub mod query;
pub mod schema;
pub mod store;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use download::{sync_months, DownloadStats};
pub use gaps::{
    find_gap_dates, missing_ranges_from_gaps, month_range, months_between, plan_backfill,
    resume_start_date, BackfillPlan, FetchRange,
};
pub use index::{FsPartitionIndex, PartitionIndex};
pub use ingest::{IngestError, IngestRequest, IngestionOutcome, Ingestor, PacingConfig};
pub use pacing::{CancelFlag, Sleeper, ThreadSleeper};
pub use provider::{FetchClient, FetchError, IngestProgress, NoProgress, StdoutProgress};
pub use query::{load_rows, project, RowQuery};
pub use schema::{map_provider_record, Column, PriceRow, ProviderRecord, SchemaError, COLUMNS};
pub use store::{MergeReport, PartitionKey, PartitionStore, StoreError};
pub use yahoo::YahooProvider;
