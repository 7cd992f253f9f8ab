//! Data models for ticketscout.

mod candidate;
mod canonical;
mod criteria;
mod demand;
mod queue;
mod session;

pub use candidate::{Availability, ExtractionMethod, Price, ScrapeCandidate};
pub use canonical::{CanonicalTicketRecord, SourceAttribution};
pub use criteria::SearchCriteria;
pub use demand::{DemandLevel, ScrapeStrategy};
pub use queue::{QueueState, QueueStatus};
pub use session::{Fingerprint, Session};
