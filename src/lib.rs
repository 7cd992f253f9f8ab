//! ticketscout - ticket and event scraping orchestration.
//!
//! The core of a ticket-monitoring product: a plugin-driven harvester that
//! extracts live ticket/event data from heterogeneous third-party platforms
//! while rotating request identities, adapting to per-platform rate limits,
//! navigating virtual waiting queues, and merging concurrent results into a
//! canonical ticket feed.

pub mod cli;
pub mod config;
pub mod demand;
pub mod identity;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod queue_nav;
pub mod rate_limit;
pub mod sink;
pub mod transport;
pub mod utils;
