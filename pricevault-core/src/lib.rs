//! PriceVault Core — incremental daily price ingestion into monthly partitions.
//!
//! This crate contains:
//! - Fixed row schema and provider record mapping
//! - Monthly CSV partition store with atomic dedupe-merge
//! - Directory index and gap detection (resume points, backfill planning)
//! - Fetch client capability with a Yahoo Finance implementation
//! - Batched ingestion with retry, backoff and adaptive pacing
//! - Read queries and a shared panel snapshot for pairwise analysis

pub mod config;
pub mod data;
pub mod panel;

pub use config::{ConfigError, VaultConfig};
pub use panel::PanelSnapshot;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed to worker threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::PriceRow>();
        require_sync::<data::PriceRow>();
        require_send::<data::PartitionStore>();
        require_sync::<data::PartitionStore>();
        require_send::<data::FsPartitionIndex>();
        require_sync::<data::FsPartitionIndex>();
        require_send::<data::IngestionOutcome>();
        require_sync::<data::IngestionOutcome>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
        require_send::<data::pacing::SharedPacer>();
        require_sync::<data::pacing::SharedPacer>();
        require_send::<data::CancelFlag>();
        require_sync::<data::CancelFlag>();
        require_send::<PanelSnapshot>();
        require_sync::<PanelSnapshot>();
        require_send::<VaultConfig>();
        require_sync::<VaultConfig>();
    }

    /// The orchestrator only sees providers through this object-safe trait.
    #[test]
    fn fetch_client_is_object_safe() {
        fn _takes_dyn(client: &dyn data::FetchClient) -> bool {
            client.is_available()
        }
    }
}
