//! Anti-detection identities: proxy rotation and browser fingerprints.

pub mod fingerprint;
pub mod proxy;

pub use fingerprint::FingerprintProvider;
pub use proxy::{ProxyError, ProxyRecord, ProxyRotator, ProxyScheme};
