//! Virtual waiting-queue navigation.
//!
//! Flash and presale releases front their inventory with a waiting room.
//! The navigator owns the queue state machine: it detects queue pages
//! through the plugin's heuristics, polls the queue at a platform-informed
//! interval (never below the rate limiter's minimum delay), optionally
//! attempts a platform-specific bypass, and abandons the wait once a
//! configured ceiling is exceeded. Abandonment is an ordinary outcome, not
//! an error.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::config::QueueSection;
use crate::models::{QueueState, QueueStatus, Session};
use crate::plugins::{HttpRequestSpec, RawResponse, ScraperPlugin};
use crate::rate_limit::RateLimiter;
use crate::transport::{HttpTransport, TransportError};

/// Queue handling knobs.
#[derive(Debug, Clone)]
pub struct QueueNavigatorConfig {
    /// Ceiling on total waiting before abandoning.
    pub max_wait: Duration,
    /// Poll interval when the plugin gives no hint.
    pub default_poll_interval: Duration,
    /// Bypass attempts allowed per queue entry.
    pub max_bypass_attempts: u32,
}

impl Default for QueueNavigatorConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(900),
            default_poll_interval: Duration::from_secs(20),
            max_bypass_attempts: 1,
        }
    }
}

impl From<&QueueSection> for QueueNavigatorConfig {
    fn from(section: &QueueSection) -> Self {
        Self {
            max_wait: Duration::from_secs(section.max_wait_secs),
            default_poll_interval: Duration::from_secs(section.poll_interval_secs),
            max_bypass_attempts: section.max_bypass_attempts,
        }
    }
}

/// Terminal result of a queue wait.
#[derive(Debug)]
pub enum QueueOutcome {
    /// The session reached the head of the queue; the caller resumes normal
    /// scraping with this response.
    Released {
        response: RawResponse,
        state: QueueState,
    },
    /// The wait exceeded the ceiling. Reported upward, never retried
    /// automatically.
    Abandoned { state: QueueState },
}

fn position_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:position|number in line|place in line|ahead of you)\D{0,24}(\d+)")
            .expect("position regex is valid")
    })
}

/// Pull an estimated position out of a waiting-room page, if it shows one.
pub fn parse_position(body: &str) -> Option<u64> {
    position_regex()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// State machine driver for virtual waiting queues.
#[derive(Debug, Clone, Default)]
pub struct QueueNavigator {
    config: QueueNavigatorConfig,
}

impl QueueNavigator {
    pub fn new(config: QueueNavigatorConfig) -> Self {
        Self { config }
    }

    /// Whether a response is a waiting-room page. Heuristics live in the
    /// plugin, not here.
    pub fn detect(&self, plugin: &dyn ScraperPlugin, response: &RawResponse) -> bool {
        plugin.is_queue_page(response)
    }

    /// Transition a fresh state into the queue.
    pub fn enter_queue(&self, state: &mut QueueState, response: &RawResponse) {
        state.status = QueueStatus::Queued;
        state.entered_at = Some(std::time::Instant::now());
        state.position = parse_position(&response.body);
        info!(
            "entered virtual queue, position {:?}, polling every {:?}",
            state.position, state.poll_interval
        );
    }

    /// Sit out a queue until released or the ceiling passes.
    ///
    /// The poll interval is the larger of the plugin's hint and the rate
    /// limiter's current minimum delay, and every poll passes through
    /// admission like any other request.
    pub async fn wait_out(
        &self,
        plugin: &dyn ScraperPlugin,
        spec: &HttpRequestSpec,
        session: &mut Session,
        transport: &dyn HttpTransport,
        limiter: &RateLimiter,
        first_response: &RawResponse,
        auto_bypass: bool,
    ) -> Result<QueueOutcome, TransportError> {
        let min_delay = limiter.min_delay(&session.platform).await;
        let hint = plugin.queue_poll_interval();
        let interval = if hint.is_zero() {
            self.config.default_poll_interval
        } else {
            hint
        }
        .max(min_delay);

        let mut state = QueueState::new(interval);
        self.enter_queue(&mut state, first_response);

        let mut bypass_attempts = 0u32;

        loop {
            // Bypass is optional and platform-specific; a failed attempt
            // drops back to Queued instead of spinning.
            if auto_bypass && bypass_attempts < self.config.max_bypass_attempts {
                if let Some(bypass) = plugin.bypass_request() {
                    bypass_attempts += 1;
                    state.status = QueueStatus::BypassAttempted;
                    limiter.admit(&session.platform).await;
                    session.note_request();
                    let response = transport.execute(&bypass, session).await?;
                    if !plugin.is_queue_page(&response) {
                        state.status = QueueStatus::Released;
                        info!("queue bypass succeeded for {}", session.platform);
                        return Ok(QueueOutcome::Released { response, state });
                    }
                    debug!("queue bypass attempt failed, staying queued");
                    state.status = QueueStatus::Queued;
                }
            }

            if state.waited() >= self.config.max_wait {
                state.status = QueueStatus::Abandoned;
                info!(
                    "abandoning queue for {} after {:?} ({} polls)",
                    session.platform,
                    state.waited(),
                    state.polls
                );
                return Ok(QueueOutcome::Abandoned { state });
            }

            let remaining = self.config.max_wait.saturating_sub(state.waited());
            tokio::time::sleep(state.poll_interval.min(remaining)).await;

            if state.waited() >= self.config.max_wait {
                state.status = QueueStatus::Abandoned;
                return Ok(QueueOutcome::Abandoned { state });
            }

            limiter.admit(&session.platform).await;
            session.note_request();
            let response = transport.execute(spec, session).await?;
            state.polls += 1;

            if !plugin.is_queue_page(&response) {
                state.status = QueueStatus::Released;
                state.position = Some(0);
                info!(
                    "released from queue for {} after {} polls",
                    session.platform, state.polls
                );
                return Ok(QueueOutcome::Released { response, state });
            }

            if let Some(position) = parse_position(&response.body) {
                state.position = Some(position);
                debug!("queue position for {}: {}", session.platform, position);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fingerprint;
    use crate::plugins::{Capabilities, ParseOutcome};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct QueuePlugin;

    impl ScraperPlugin for QueuePlugin {
        fn platform(&self) -> &str {
            "queuesite"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                search: true,
                ..Default::default()
            }
        }
        fn build_request(
            &self,
            _criteria: &crate::models::SearchCriteria,
        ) -> Result<HttpRequestSpec, crate::plugins::PluginError> {
            Ok(HttpRequestSpec::get("https://queuesite.test/search".to_string()))
        }
        fn parse_response(&self, _response: &RawResponse) -> ParseOutcome {
            ParseOutcome::empty()
        }
        fn probe_request(&self) -> HttpRequestSpec {
            HttpRequestSpec::get("https://queuesite.test/".to_string())
        }
        fn is_queue_page(&self, response: &RawResponse) -> bool {
            response.body.contains("waiting room")
        }
        fn queue_poll_interval(&self) -> Duration {
            Duration::from_millis(20)
        }
    }

    /// Returns queue pages for the first N polls, then a real page.
    struct CountdownTransport {
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for CountdownTransport {
        async fn execute(
            &self,
            _spec: &HttpRequestSpec,
            _session: &Session,
        ) -> Result<RawResponse, TransportError> {
            let left = self.remaining.load(Ordering::SeqCst);
            let body = if left == 0 {
                "<html>real inventory</html>".to_string()
            } else {
                self.remaining.fetch_sub(1, Ordering::SeqCst);
                format!("<html>waiting room, position in line: {}</html>", left)
            };
            Ok(RawResponse {
                status: 200,
                final_url: "https://queuesite.test/search".to_string(),
                headers: HashMap::new(),
                body,
                elapsed: Duration::from_millis(5),
            })
        }
    }

    fn session() -> Session {
        Session::new(
            "queuesite",
            Fingerprint {
                user_agent: "ua".to_string(),
                headers: Vec::new(),
                viewport: (1, 1),
                jitter_ms: (0, 0),
            },
            None,
        )
    }

    fn limiter() -> RateLimiter {
        RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(1),
            min_delay: Duration::from_millis(1),
            ..Default::default()
        })
    }

    fn queue_response(position: u64) -> RawResponse {
        RawResponse {
            status: 200,
            final_url: "https://queuesite.test/search".to_string(),
            headers: HashMap::new(),
            body: format!("waiting room, position in line: {}", position),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("Your position in line: 1532"), Some(1532));
        assert_eq!(parse_position("people ahead of you: 7"), Some(7));
        assert_eq!(parse_position("no numbers here"), None);
    }

    #[tokio::test]
    async fn test_released_when_queue_clears() {
        let navigator = QueueNavigator::new(QueueNavigatorConfig {
            max_wait: Duration::from_secs(5),
            default_poll_interval: Duration::from_millis(20),
            max_bypass_attempts: 0,
        });
        let transport = CountdownTransport {
            remaining: AtomicUsize::new(2),
        };
        let plugin = QueuePlugin;
        let limiter = limiter();
        let mut session = session();
        let spec = HttpRequestSpec::get("https://queuesite.test/search".to_string());

        let outcome = navigator
            .wait_out(
                &plugin,
                &spec,
                &mut session,
                &transport,
                &limiter,
                &queue_response(3),
                false,
            )
            .await
            .unwrap();

        match outcome {
            QueueOutcome::Released { state, response } => {
                assert_eq!(state.status, QueueStatus::Released);
                assert!(response.body.contains("real inventory"));
                assert!(state.polls >= 2);
            }
            QueueOutcome::Abandoned { .. } => panic!("expected release"),
        }
    }

    #[tokio::test]
    async fn test_abandoned_past_ceiling() {
        let navigator = QueueNavigator::new(QueueNavigatorConfig {
            max_wait: Duration::from_millis(60),
            default_poll_interval: Duration::from_millis(20),
            max_bypass_attempts: 0,
        });
        // Queue never clears.
        let transport = CountdownTransport {
            remaining: AtomicUsize::new(usize::MAX),
        };
        let plugin = QueuePlugin;
        let limiter = limiter();
        let mut session = session();
        let spec = HttpRequestSpec::get("https://queuesite.test/search".to_string());

        let outcome = navigator
            .wait_out(
                &plugin,
                &spec,
                &mut session,
                &transport,
                &limiter,
                &queue_response(9000),
                false,
            )
            .await
            .unwrap();

        match outcome {
            QueueOutcome::Abandoned { state } => {
                assert_eq!(state.status, QueueStatus::Abandoned);
            }
            QueueOutcome::Released { .. } => panic!("expected abandonment"),
        }
    }
}
