//! The delivery boundary toward persistence.
//!
//! Storage of canonical records lives outside this core. The contract is
//! narrow: the orchestrator hands over validated, deduplicated batches and
//! never partial or corrupt ones.

use async_trait::async_trait;
use tracing::info;

use crate::models::CanonicalTicketRecord;

/// Accepts batches of merged ticket records.
#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn deliver(&self, records: &[CanonicalTicketRecord]) -> anyhow::Result<()>;
}

/// Sink that logs each delivered batch. Used by the CLI and as the default
/// when no persistence backend is wired up.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TicketSink for LogSink {
    async fn deliver(&self, records: &[CanonicalTicketRecord]) -> anyhow::Result<()> {
        info!("delivering {} canonical records", records.len());
        for record in records {
            info!(
                "  {} | {} @ {} | {} sources | confidence {:.2}",
                &record.identity[..12.min(record.identity.len())],
                record.name,
                record.venue,
                record.sources.len(),
                record.confidence
            );
        }
        Ok(())
    }
}
