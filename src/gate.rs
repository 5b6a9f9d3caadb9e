//! Waiting out anti-bot interstitials.
//!
//! After a navigation the session may be showing a challenge page instead of
//! real content. [`ChallengeGate::wait`] re-reads the page at a fixed interval
//! until it looks genuine or the timeout elapses. Whether a timeout is fatal
//! is the caller's decision: the login check treats it as fatal, content
//! pages carry on and let later checks notice the damage.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::session::{BrowserSession, PageSnapshot, SessionError};

/// Default polling interval.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default ceiling on the total wait.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of waiting at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The page looks like real content.
    Passed(PageSnapshot),
    /// Still challenged when the timeout elapsed; carries the last page seen.
    TimedOut(PageSnapshot),
}

impl GateOutcome {
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed(_))
    }

    /// The last page observed, passed or not.
    #[must_use]
    pub fn page(&self) -> &PageSnapshot {
        match self {
            Self::Passed(page) | Self::TimedOut(page) => page,
        }
    }

    #[must_use]
    pub fn into_page(self) -> PageSnapshot {
        match self {
            Self::Passed(page) | Self::TimedOut(page) => page,
        }
    }
}

/// Bounded polling wait for a challenge to clear.
#[derive(Debug, Clone)]
pub struct ChallengeGate {
    interval: Duration,
    timeout: Duration,
    blocked_markers: Vec<String>,
    content_markers: Vec<String>,
}

impl Default for ChallengeGate {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_GATE_TIMEOUT)
    }
}

impl ChallengeGate {
    /// Creates a gate with the default interstitial and content markers.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            blocked_markers: vec!["Just a moment".to_string(), "Verify you are human".to_string()],
            content_markers: vec!["favorites".to_string(), "gallery".to_string()],
        }
    }

    /// Replaces the markers that identify genuine content.
    ///
    /// An empty list means "not blocked" is enough to pass.
    #[must_use]
    pub fn with_content_markers(mut self, markers: Vec<String>) -> Self {
        self.content_markers = markers;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if `page` shows genuine content rather than a challenge.
    #[must_use]
    pub fn is_past_challenge(&self, page: &PageSnapshot) -> bool {
        if self
            .blocked_markers
            .iter()
            .any(|marker| page.content.contains(marker.as_str()))
        {
            return false;
        }

        self.content_markers.is_empty()
            || self.content_markers.iter().any(|marker| {
                page.url.contains(marker.as_str()) || page.content.contains(marker.as_str())
            })
    }

    /// Waits until the session's page is past the challenge.
    ///
    /// `page` is the snapshot returned by the navigation; it is checked
    /// immediately, then the session is re-read every interval.
    ///
    /// # Errors
    ///
    /// Returns the session's error if re-reading the page fails.
    pub async fn wait(
        &self,
        session: &mut dyn BrowserSession,
        page: PageSnapshot,
    ) -> Result<GateOutcome, SessionError> {
        let deadline = Instant::now() + self.timeout;
        let mut page = page;
        let mut polls = 0_u32;

        loop {
            if self.is_past_challenge(&page) {
                if polls > 0 {
                    debug!(url = %page.url, polls, "challenge cleared");
                }
                return Ok(GateOutcome::Passed(page));
            }

            if Instant::now() + self.interval > deadline {
                warn!(
                    url = %page.url,
                    timeout_secs = self.timeout.as_secs(),
                    "challenge did not clear before timeout"
                );
                return Ok(GateOutcome::TimedOut(page));
            }

            tokio::time::sleep(self.interval).await;
            polls += 1;
            page = session.snapshot().await?;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::session::{DownloadTarget, DownloadedFile, ElementData, ElementQuery};

    const CHALLENGE: &str = "<title>Just a moment...</title>";
    const CONTENT: &str = "<div class=\"gallery\">ok</div>";

    /// Session whose `snapshot` replays a queue of page bodies.
    struct ReplaySession {
        pages: VecDeque<&'static str>,
        snapshots: usize,
    }

    impl ReplaySession {
        fn new(pages: &[&'static str]) -> Self {
            Self {
                pages: pages.iter().copied().collect(),
                snapshots: 0,
            }
        }
    }

    fn page(content: &str) -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com/g/1/".to_string(),
            status: 200,
            content: content.to_string(),
        }
    }

    #[async_trait]
    impl BrowserSession for ReplaySession {
        async fn navigate(&mut self, _url: &str) -> Result<PageSnapshot, SessionError> {
            unreachable!("gate never navigates")
        }

        async fn snapshot(&mut self) -> Result<PageSnapshot, SessionError> {
            self.snapshots += 1;
            let content = self.pages.pop_front().unwrap_or(CHALLENGE);
            Ok(page(content))
        }

        async fn query(&mut self, _query: &ElementQuery) -> Result<Vec<ElementData>, SessionError> {
            Ok(Vec::new())
        }

        async fn trigger_download(
            &mut self,
            _target: &DownloadTarget,
        ) -> Result<DownloadedFile, SessionError> {
            Err(SessionError::NoPage)
        }

        async fn close(&mut self) {}
    }

    #[test]
    fn test_blocked_marker_wins_over_content_marker() {
        let gate = ChallengeGate::default();
        assert!(!gate.is_past_challenge(&page("gallery <p>Verify you are human</p>")));
        assert!(gate.is_past_challenge(&page(CONTENT)));
    }

    #[test]
    fn test_content_marker_in_url_passes() {
        let gate = ChallengeGate::default();
        let snapshot = PageSnapshot {
            url: "https://example.com/favorites/".to_string(),
            status: 200,
            content: "<p>empty</p>".to_string(),
        };
        assert!(gate.is_past_challenge(&snapshot));
    }

    #[test]
    fn test_empty_content_markers_pass_unless_blocked() {
        let gate = ChallengeGate::default().with_content_markers(Vec::new());
        assert!(gate.is_past_challenge(&page("<p>anything</p>")));
        assert!(!gate.is_past_challenge(&page(CHALLENGE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_passes_immediately_without_polling() {
        let gate = ChallengeGate::default();
        let mut session = ReplaySession::new(&[]);

        let outcome = gate.wait(&mut session, page(CONTENT)).await.unwrap();
        assert!(outcome.is_passed());
        assert_eq!(session.snapshots, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_until_challenge_clears() {
        let gate = ChallengeGate::default();
        let mut session = ReplaySession::new(&[CHALLENGE, CHALLENGE, CONTENT]);

        let start = Instant::now();
        let outcome = gate.wait(&mut session, page(CHALLENGE)).await.unwrap();
        assert!(outcome.is_passed());
        assert_eq!(session.snapshots, 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_last_page() {
        let gate = ChallengeGate::new(Duration::from_secs(1), Duration::from_secs(5));
        let mut session = ReplaySession::new(&[]);

        let outcome = gate.wait(&mut session, page(CHALLENGE)).await.unwrap();
        assert!(!outcome.is_passed());
        assert!(outcome.page().content.contains("Just a moment"));
        assert_eq!(session.snapshots, 5);
    }
}
