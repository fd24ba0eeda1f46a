//! Cursor-following traversal over the service's JSON feeds
//!
//! Every feed page carries an optional relative `next` link. The walker keeps
//! requesting pages in link order until the link is missing, the handler asks
//! to stop, a page keeps failing to parse, or the link leaves the service
//! host. Feed requests carry the login cookies, never the bearer token.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PAGE_RETRIES;
use crate::session::Session;

/// JSON pointer of the next link in the conversations feed.
pub const CONVERSATIONS_NEXT: &str = "/response/_links/next/href";
/// JSON pointer of the next link in the messages feed.
pub const MESSAGES_NEXT: &str = "/response/messages/_links/next/href";

/// Outcome of a feed traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Pages handed to the handler.
    pub pages: usize,
    /// The handler returned `Break`.
    pub stopped_early: bool,
    /// A page never produced valid JSON and the walk ended there.
    pub gave_up: bool,
}

/// Sleep between pages for a requests-per-minute limit.
pub fn rate_limit_delay(requests_per_minute: u32) -> Duration {
    if requests_per_minute == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(60.0 / f64::from(requests_per_minute))
}

pub struct Pager<'a> {
    session: &'a Session,
    retries: u32,
    rate_limit: Option<u32>,
}

impl<'a> Pager<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            retries: PAGE_RETRIES,
            rate_limit: None,
        }
    }

    /// Attempts per page before the walk is abandoned.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Requests per minute; `None` or `0` means no throttling.
    pub fn with_rate_limit(mut self, requests_per_minute: Option<u32>) -> Self {
        self.rate_limit = requests_per_minute.filter(|r| *r > 0);
        self
    }

    /// Walk the feed starting at `initial`, following the link at `next_pointer`.
    ///
    /// A page that keeps failing to parse ends the walk quietly: everything
    /// gathered so far is kept.
    pub async fn fetch_all<F>(&self, initial: &str, next_pointer: &str, mut handler: F) -> WalkSummary
    where
        F: FnMut(&Value) -> ControlFlow<()>,
    {
        let mut summary = WalkSummary::default();
        let mut visited = HashSet::new();
        let mut url = self.session.url(initial);

        loop {
            if !visited.insert(url.clone()) {
                warn!(%url, "next link points to an already visited page, stopping");
                return summary;
            }

            let Some(page) = self.fetch_page(&url).await else {
                warn!(%url, retries = self.retries, "page never returned JSON, stopping");
                summary.gave_up = true;
                return summary;
            };

            summary.pages += 1;
            if handler(&page).is_break() {
                summary.stopped_early = true;
                return summary;
            }

            let next = page
                .pointer(next_pointer)
                .and_then(Value::as_str)
                .filter(|href| !href.is_empty());
            let Some(next) = next else {
                return summary;
            };
            url = self.session.url(next);
            if !self.session.client().is_same_origin(&url) {
                warn!(%url, "next link leaves the service host, stopping");
                return summary;
            }

            if let Some(rate) = self.rate_limit {
                tokio::time::sleep(rate_limit_delay(rate)).await;
            }
        }
    }

    async fn fetch_page(&self, url: &str) -> Option<Value> {
        for attempt in 1..=self.retries {
            debug!(url, attempt, "fetching page");
            let response = self
                .session
                .client()
                .http()
                .get(url)
                .header("X-Requested-With", "XMLHttpRequest")
                .send()
                .await;

            let body = match response {
                Ok(response) => response.text().await,
                Err(e) => Err(e),
            };

            match body.map(|text| serde_json::from_str::<Value>(&text)) {
                Ok(Ok(value)) if value.is_object() => return Some(value),
                Ok(Ok(_)) => warn!(attempt, "page is not a JSON object, retry"),
                Ok(Err(e)) => warn!(attempt, error = %e, "page is not JSON, retry"),
                Err(e) => warn!(attempt, error = %e, "page request failed, retry"),
            }
        }
        None
    }
}
