//! Browser fingerprint generation.
//!
//! Each session gets an internally consistent identity: a chosen user agent
//! implies its matching Accept/Accept-Language/sec-ch-ua header set and a
//! plausible viewport. Sessions also carry a human delay range used to pace
//! requests within the session.

use std::time::{Duration, SystemTime};

use crate::identity::proxy::ProxyRecord;
use crate::models::{Fingerprint, Session};

/// One internally consistent browser identity.
///
/// Header values within a profile belong together; mixing a Chrome user
/// agent with Firefox accept headers is a detection giveaway.
struct BrowserProfile {
    user_agent: &'static str,
    accept: &'static str,
    accept_language: &'static str,
    sec_ch_ua: Option<&'static str>,
    sec_ch_ua_platform: Option<&'static str>,
    viewport: (u32, u32),
}

/// Current identities from popular browsers (updated Nov 2024).
const BROWSER_PROFILES: &[BrowserProfile] = &[
    // Chrome on Windows
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        accept_language: "en-US,en;q=0.9",
        sec_ch_ua: Some("\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
        sec_ch_ua_platform: Some("\"Windows\""),
        viewport: (1920, 1080),
    },
    // Chrome on Mac
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        accept_language: "en-US,en;q=0.9",
        sec_ch_ua: Some("\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
        sec_ch_ua_platform: Some("\"macOS\""),
        viewport: (1680, 1050),
    },
    // Firefox on Windows
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/png,image/svg+xml,*/*;q=0.8",
        accept_language: "en-US,en;q=0.5",
        sec_ch_ua: None,
        sec_ch_ua_platform: None,
        viewport: (1920, 1080),
    },
    // Firefox on Mac
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/png,image/svg+xml,*/*;q=0.8",
        accept_language: "en-US,en;q=0.5",
        sec_ch_ua: None,
        sec_ch_ua_platform: None,
        viewport: (1440, 900),
    },
    // Safari on Mac
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
        sec_ch_ua: None,
        sec_ch_ua_platform: None,
        viewport: (1728, 1117),
    },
    // Edge on Windows
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        accept_language: "en-US,en;q=0.9",
        sec_ch_ua: Some("\"Microsoft Edge\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
        sec_ch_ua_platform: Some("\"Windows\""),
        viewport: (1920, 1080),
    },
];

fn pick_profile() -> &'static BrowserProfile {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as usize)
        .unwrap_or(0);
    &BROWSER_PROFILES[nanos % BROWSER_PROFILES.len()]
}

/// Mints single-use sessions with consistent browser identities.
#[derive(Debug, Clone)]
pub struct FingerprintProvider {
    /// Human delay range applied within a session, milliseconds.
    jitter_ms: (u64, u64),
    /// Request budget per session.
    session_max_requests: u32,
    /// Age ceiling per session.
    session_max_age: Duration,
}

impl FingerprintProvider {
    pub fn new(jitter_ms: (u64, u64), session_max_requests: u32, session_max_age: Duration) -> Self {
        Self {
            jitter_ms,
            session_max_requests,
            session_max_age,
        }
    }

    /// Produce a fresh fingerprint from one of the known browser profiles.
    pub fn new_fingerprint(&self) -> Fingerprint {
        let profile = pick_profile();
        let mut headers: Vec<(String, String)> = vec![
            ("Accept".to_string(), profile.accept.to_string()),
            (
                "Accept-Language".to_string(),
                profile.accept_language.to_string(),
            ),
        ];
        if let Some(sec_ch_ua) = profile.sec_ch_ua {
            headers.push(("sec-ch-ua".to_string(), sec_ch_ua.to_string()));
            headers.push(("sec-ch-ua-mobile".to_string(), "?0".to_string()));
        }
        if let Some(platform) = profile.sec_ch_ua_platform {
            headers.push(("sec-ch-ua-platform".to_string(), platform.to_string()));
        }
        headers.push((
            "Upgrade-Insecure-Requests".to_string(),
            "1".to_string(),
        ));

        Fingerprint {
            user_agent: profile.user_agent.to_string(),
            headers,
            viewport: profile.viewport,
            jitter_ms: self.jitter_ms,
        }
    }

    /// Mint a fresh session for one platform. The session is owned by a
    /// single scrape task and never handed to another.
    pub fn new_session(&self, platform: &str, proxy: Option<ProxyRecord>) -> Session {
        Session::new(platform, self.new_fingerprint(), proxy)
            .with_budget(self.session_max_requests, self.session_max_age)
    }
}

impl Default for FingerprintProvider {
    fn default() -> Self {
        Self::new((250, 1500), 12, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_headers_are_consistent() {
        let provider = FingerprintProvider::default();
        for _ in 0..20 {
            let fp = provider.new_fingerprint();
            let has_sec_ch_ua = fp.headers.iter().any(|(k, _)| k == "sec-ch-ua");
            let chromium_family =
                fp.user_agent.contains("Chrome/") || fp.user_agent.contains("Edg/");
            // Client hint headers only belong to the Chromium family.
            assert_eq!(has_sec_ch_ua, chromium_family, "ua: {}", fp.user_agent);
        }
    }

    #[test]
    fn test_sessions_are_unique() {
        let provider = FingerprintProvider::default();
        let a = provider.new_session("ticketmax", None);
        let b = provider.new_session("ticketmax", None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_session_inherits_budget() {
        let provider = FingerprintProvider::new((0, 0), 3, Duration::from_secs(60));
        let session = provider.new_session("ticketmax", None);
        assert_eq!(session.max_requests, 3);
        assert_eq!(session.max_age, Duration::from_secs(60));
    }
}
