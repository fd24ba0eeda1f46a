//! Message retrieval and normalization
//!
//! Walks the messages feed of one conversation and turns each event into a
//! single transcript line keyed by its timestamp.

use std::collections::HashSet;
use std::ops::ControlFlow;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{blog_host, PAGE_RETRIES};
use crate::conversations::IdentityMap;
use crate::pager::{Pager, MESSAGES_NEXT};
use crate::session::Session;
use crate::transcript::Transcript;

pub const POST_UNAVAILABLE: &str = "sent a post that's no longer available.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageSize {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Image {
    pub original_size: ImageSize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostRef {
    #[serde(default)]
    pub post_url: String,
}

/// Message payload by kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    #[serde(rename = "TEXT")]
    Text {
        #[serde(default)]
        message: String,
    },
    #[serde(rename = "IMAGE")]
    Image {
        #[serde(default)]
        images: Vec<Image>,
    },
    #[serde(rename = "POSTREF")]
    PostRef {
        #[serde(default)]
        post: PostRef,
    },
    #[serde(other)]
    Unknown,
}

/// One entry of the messages feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    #[serde(deserialize_with = "deserialize_millis")]
    pub ts: i64,
    #[serde(default)]
    pub participant: String,
    #[serde(flatten)]
    pub body: MessageBody,
}

/// The feed sends `ts` either as a number or as a numeric string.
fn deserialize_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(i64),
        Text(String),
    }

    let millis = match Millis::deserialize(deserializer)? {
        Millis::Number(n) => n,
        Millis::Text(s) => s.trim().parse().map_err(serde::de::Error::custom)?,
    };
    if DateTime::from_timestamp_millis(millis).is_none() {
        return Err(serde::de::Error::custom(format!(
            "timestamp {} is out of range",
            millis
        )));
    }
    Ok(millis)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub timestamp_millis: i64,
    pub rendered_line: String,
}

/// Render an event as `<dd/mm/YYYY, HH:MM:SS> <author>: <body>`.
///
/// Returns `None` for kinds that have no textual form.
pub fn render(event: &MessageEvent, identities: &IdentityMap, clock: &Clock) -> Option<MessageRecord> {
    let author = identities
        .get(&event.participant)
        .map(String::as_str)
        .unwrap_or(event.participant.as_str());

    let body = match &event.body {
        MessageBody::Text { message } => message.clone(),
        MessageBody::Image { images } => images
            .iter()
            .map(|image| image.original_size.url.as_str())
            .collect::<Vec<_>>()
            .join(" , "),
        MessageBody::PostRef { post } if post.post_url.is_empty() => POST_UNAVAILABLE.to_string(),
        MessageBody::PostRef { post } => post.post_url.clone(),
        MessageBody::Unknown => return None,
    };

    Some(MessageRecord {
        timestamp_millis: event.ts,
        rendered_line: format!("{} {}: {}", clock.stamp(event.ts), author, body),
    })
}

/// Knobs for [`collect`].
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Oldest calendar date to keep; reaching an older message ends paging.
    ///
    /// Everything dated on or after the cutoff is kept, not only that one day.
    pub cutoff: Option<NaiveDate>,
    /// Requests per minute.
    pub rate_limit: Option<u32>,
    pub page_retries: u32,
    pub clock: Clock,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            cutoff: None,
            rate_limit: None,
            page_retries: PAGE_RETRIES,
            clock: Clock::Local,
        }
    }
}

/// First page of the messages feed of a conversation.
pub fn messages_path(conversation_id: &str, blog: &str, now_millis: i64) -> String {
    format!(
        "/svc/conversations/messages?conversation_id={}&participant={}&_={}",
        conversation_id,
        blog_host(blog),
        now_millis
    )
}

struct MessageScan<'a> {
    identities: &'a IdentityMap,
    options: &'a CollectOptions,
    transcript: Transcript,
    unresolved: HashSet<String>,
    skipped: usize,
}

impl<'a> MessageScan<'a> {
    fn new(identities: &'a IdentityMap, options: &'a CollectOptions) -> Self {
        Self {
            identities,
            options,
            transcript: Transcript::default(),
            unresolved: HashSet::new(),
            skipped: 0,
        }
    }

    fn on_page(&mut self, page: &Value) -> ControlFlow<()> {
        let Some(entries) = page
            .pointer("/response/messages/data")
            .and_then(Value::as_array)
        else {
            warn!("messages page has no data, stopping");
            return ControlFlow::Break(());
        };

        let clock = &self.options.clock;
        for (i, entry) in entries.iter().enumerate() {
            let event: MessageEvent = match serde_json::from_value(entry.clone()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, %entry, "undecodable message skipped");
                    self.skipped += 1;
                    continue;
                }
            };

            if i == 0 {
                info!(first = %clock.stamp(event.ts), count = entries.len(), "messages page");
            }

            if let Some(cutoff) = self.options.cutoff {
                if clock.date(event.ts) < cutoff {
                    info!(%cutoff, "reached messages older than cutoff");
                    return ControlFlow::Break(());
                }
            }

            if !self.identities.contains_key(&event.participant)
                && self.unresolved.insert(event.participant.clone())
            {
                warn!(participant = %event.participant, "unknown participant, using raw id");
            }

            match render(&event, self.identities, clock) {
                Some(record) => {
                    if self.transcript.insert(record).is_some() {
                        debug!(ts = event.ts, "duplicate timestamp, keeping the later message");
                    }
                }
                None => {
                    let kind = entry.get("type").and_then(Value::as_str).unwrap_or("?");
                    warn!(kind, %entry, "UNKNOWN message kind skipped");
                    self.skipped += 1;
                }
            }
        }
        ControlFlow::Continue(())
    }
}

/// Gather every message of `conversation_id` into a transcript.
pub async fn collect(
    session: &Session,
    conversation_id: &str,
    blog: &str,
    identities: &IdentityMap,
    options: &CollectOptions,
) -> Transcript {
    info!(conversation_id, "Fetching messages...");
    let mut scan = MessageScan::new(identities, options);
    let path = messages_path(conversation_id, blog, chrono::Utc::now().timestamp_millis());

    let summary = Pager::new(session)
        .with_retries(options.page_retries)
        .with_rate_limit(options.rate_limit)
        .fetch_all(&path, MESSAGES_NEXT, |page| scan.on_page(page))
        .await;

    info!(
        pages = summary.pages,
        messages = scan.transcript.len(),
        skipped = scan.skipped,
        "done"
    );
    scan.transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WebClient;
    use httpmock::prelude::*;
    use serde_json::json;

    // 2024-01-02 03:04:05 UTC
    const DAY2: i64 = 1_704_164_645_000;
    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    fn identities() -> IdentityMap {
        IdentityMap::from([
            ("u-me".to_string(), "myblog".to_string()),
            ("u-ann".to_string(), "ann".to_string()),
        ])
    }

    fn options() -> CollectOptions {
        CollectOptions {
            clock: Clock::utc(),
            ..CollectOptions::default()
        }
    }

    fn messages_page(data: Value, next: Option<&str>) -> Value {
        let mut messages = json!({ "data": data });
        if let Some(href) = next {
            messages["_links"] = json!({ "next": { "href": href } });
        }
        json!({ "response": { "messages": messages } })
    }

    fn session(server: &MockServer) -> Session {
        let client = WebClient::new(&server.base_url(), false).expect("client");
        Session::new(client, "tok".to_string())
    }

    fn event(value: Value) -> MessageEvent {
        serde_json::from_value(value).expect("event")
    }

    #[test]
    fn decodes_each_kind() {
        let text = event(json!({ "type": "TEXT", "ts": "1704164645000", "participant": "u-me", "message": "hi" }));
        assert_eq!(text.ts, DAY2);
        assert_eq!(text.body, MessageBody::Text { message: "hi".into() });

        let image = event(json!({
            "type": "IMAGE", "ts": DAY2, "participant": "u-me",
            "images": [{ "original_size": { "url": "https://img/1.png" } }]
        }));
        assert!(matches!(image.body, MessageBody::Image { ref images } if images.len() == 1));

        let post = event(json!({ "type": "POSTREF", "ts": DAY2, "participant": "u-me", "post": { "post_url": "" } }));
        assert_eq!(post.body, MessageBody::PostRef { post: PostRef::default() });

        let sticker = event(json!({ "type": "STICKER", "ts": DAY2, "participant": "u-me", "sticker": {} }));
        assert_eq!(sticker.body, MessageBody::Unknown);
    }

    #[test]
    fn event_without_type_is_rejected() {
        let result = serde_json::from_value::<MessageEvent>(json!({ "ts": DAY2, "participant": "u-me" }));
        assert!(result.is_err());
    }

    #[test]
    fn render_text_image_and_postref() {
        let clock = Clock::utc();
        let ids = identities();

        let text = event(json!({ "type": "TEXT", "ts": DAY2, "participant": "u-ann", "message": "hello" }));
        assert_eq!(
            render(&text, &ids, &clock).unwrap().rendered_line,
            "02/01/2024, 03:04:05 ann: hello"
        );

        let image = event(json!({
            "type": "IMAGE", "ts": DAY2, "participant": "u-me",
            "images": [
                { "original_size": { "url": "https://img/1.png" } },
                { "original_size": { "url": "https://img/2.png" } }
            ]
        }));
        assert_eq!(
            render(&image, &ids, &clock).unwrap().rendered_line,
            "02/01/2024, 03:04:05 myblog: https://img/1.png , https://img/2.png"
        );

        let post = event(json!({
            "type": "POSTREF", "ts": DAY2, "participant": "u-me",
            "post": { "post_url": "https://myblog.tumblr.com/post/1" }
        }));
        assert_eq!(
            render(&post, &ids, &clock).unwrap().rendered_line,
            "02/01/2024, 03:04:05 myblog: https://myblog.tumblr.com/post/1"
        );

        let gone = event(json!({ "type": "POSTREF", "ts": DAY2, "participant": "u-me", "post": {} }));
        assert!(render(&gone, &ids, &clock)
            .unwrap()
            .rendered_line
            .ends_with("myblog: sent a post that's no longer available."));
    }

    #[test]
    fn render_falls_back_to_raw_participant() {
        let text = event(json!({ "type": "TEXT", "ts": DAY2, "participant": "u-zed", "message": "?" }));
        let record = render(&text, &identities(), &Clock::utc()).unwrap();
        assert_eq!(record.rendered_line, "02/01/2024, 03:04:05 u-zed: ?");
    }

    #[test]
    fn render_skips_unknown_kind() {
        let sticker = event(json!({ "type": "STICKER", "ts": DAY2, "participant": "u-me" }));
        assert!(render(&sticker, &identities(), &Clock::utc()).is_none());
    }

    #[test]
    fn scan_keeps_last_message_on_timestamp_collision() {
        let ids = identities();
        let opts = options();
        let mut scan = MessageScan::new(&ids, &opts);

        let page = messages_page(
            json!([
                { "type": "TEXT", "ts": DAY2, "participant": "u-me", "message": "first" },
                { "type": "TEXT", "ts": DAY2, "participant": "u-me", "message": "second" }
            ]),
            None,
        );
        assert!(scan.on_page(&page).is_continue());
        assert_eq!(scan.transcript.len(), 1);
        assert!(scan.transcript.lines()[0].ends_with("second"));
    }

    #[test]
    fn scan_skips_unknown_and_undecodable_entries() {
        let ids = identities();
        let opts = options();
        let mut scan = MessageScan::new(&ids, &opts);

        let page = messages_page(
            json!([
                { "type": "STICKER", "ts": DAY2, "participant": "u-me" },
                { "participant": "u-me" },
                { "type": "TEXT", "ts": DAY2 + 1, "participant": "u-me", "message": "kept" }
            ]),
            None,
        );
        assert!(scan.on_page(&page).is_continue());
        assert_eq!(scan.transcript.len(), 1);
        assert_eq!(scan.skipped, 2);
    }

    #[test]
    fn out_of_range_timestamp_is_skipped_not_a_cutoff() {
        let ids = identities();
        let opts = CollectOptions {
            cutoff: NaiveDate::from_ymd_opt(2024, 1, 2),
            ..options()
        };
        let mut scan = MessageScan::new(&ids, &opts);

        let page = messages_page(
            json!([
                { "type": "TEXT", "ts": i64::MAX, "participant": "u-me", "message": "broken" },
                { "type": "TEXT", "ts": DAY2, "participant": "u-me", "message": "kept" }
            ]),
            None,
        );
        assert!(scan.on_page(&page).is_continue());
        assert_eq!(scan.skipped, 1);
        assert_eq!(scan.transcript.len(), 1);
        assert!(scan.transcript.lines()[0].ends_with("kept"));
    }

    #[test]
    fn scan_stops_on_missing_data() {
        let ids = identities();
        let opts = options();
        let mut scan = MessageScan::new(&ids, &opts);
        assert!(scan.on_page(&json!({ "meta": { "status": 404 } })).is_break());
    }

    #[test]
    fn messages_path_carries_conversation_and_blog() {
        assert_eq!(
            messages_path("42", "myblog", 7),
            "/svc/conversations/messages?conversation_id=42&participant=myblog.tumblr.com&_=7"
        );
    }

    #[tokio::test]
    async fn collect_sorts_out_of_order_feed() {
        let server = MockServer::start_async().await;

        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/svc/conversations/messages")
                .query_param("conversation_id", "c1")
                .query_param("participant", "myblog.tumblr.com");
            then.status(200).json_body(messages_page(
                json!([
                    { "type": "POSTREF", "ts": DAY2 + 2 * HOUR, "participant": "u-ann",
                      "post": { "post_url": "https://ann.tumblr.com/post/9" } },
                    { "type": "TEXT", "ts": DAY2, "participant": "u-me", "message": "morning" }
                ]),
                Some("/svc/conversations/messages/older"),
            ));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/svc/conversations/messages/older");
            then.status(200).json_body(messages_page(
                json!([
                    { "type": "IMAGE", "ts": DAY2 + HOUR, "participant": "u-ann",
                      "images": [{ "original_size": { "url": "https://img/cat.gif" } }] },
                    { "type": "TEXT", "ts": DAY2 - HOUR, "participant": "u-ann", "message": "early" }
                ]),
                None,
            ));
        });

        let session = session(&server);
        let transcript = collect(&session, "c1", "myblog", &identities(), &options()).await;

        assert_eq!(
            transcript.lines(),
            vec![
                "02/01/2024, 02:04:05 ann: early",
                "02/01/2024, 03:04:05 myblog: morning",
                "02/01/2024, 04:04:05 ann: https://img/cat.gif",
                "02/01/2024, 05:04:05 ann: https://ann.tumblr.com/post/9",
            ]
        );
        first.assert_calls(1);
        second.assert_calls(1);
    }

    #[tokio::test]
    async fn cutoff_keeps_same_day_and_halts_on_older() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(GET).path("/svc/conversations/messages");
            then.status(200).json_body(messages_page(
                json!([
                    { "type": "TEXT", "ts": DAY2, "participant": "u-me", "message": "on the day" },
                    { "type": "TEXT", "ts": DAY2 - DAY, "participant": "u-me", "message": "day before" },
                    { "type": "TEXT", "ts": DAY2 + HOUR, "participant": "u-me", "message": "after stop" }
                ]),
                Some("/svc/conversations/messages/older"),
            ));
        });
        let older = server.mock(|when, then| {
            when.method(GET).path("/svc/conversations/messages/older");
            then.status(200).json_body(messages_page(json!([]), None));
        });

        let session = session(&server);
        let opts = CollectOptions {
            cutoff: NaiveDate::from_ymd_opt(2024, 1, 2),
            ..options()
        };
        let transcript = collect(&session, "c1", "myblog", &identities(), &opts).await;

        assert_eq!(transcript.lines(), vec!["02/01/2024, 03:04:05 myblog: on the day"]);
        older.assert_calls(0);
    }
}
