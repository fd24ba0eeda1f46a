//! Conversation discovery and participant identities

use std::collections::HashMap;
use std::ops::ControlFlow;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{blog_host, BLOG_SUFFIX};
use crate::error::{Error, Result};
use crate::pager::{Pager, CONVERSATIONS_NEXT};
use crate::prompt::Prompter;
use crate::session::Session;

/// Participant uuid → display (blog) name.
pub type IdentityMap = HashMap<String, String>;

/// Which conversation to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    /// Known conversation id.
    Id(String),
    /// Conversation with the blog of this name.
    Counterpart(String),
    /// Pick from a menu of every conversation.
    Interactive,
}

impl ConversationTarget {
    /// An explicit id wins over a counterpart name; blank values are ignored.
    pub fn from_options(id: Option<String>, counterpart: Option<String>) -> Self {
        let id = id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let counterpart = counterpart
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        match (id, counterpart) {
            (Some(id), _) => Self::Id(id),
            (None, Some(name)) => Self::Counterpart(name),
            (None, None) => Self::Interactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Participant {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl Conversation {
    pub fn participant_names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name.as_str()).collect()
    }

    /// Menu line, e.g. `[1] abc123: myblog <=> friend`.
    pub fn menu_line(&self, index: usize) -> String {
        format!("[{}] {}: {}", index, self.id, self.participant_names().join(" <=> "))
    }
}

#[derive(Debug, Deserialize)]
struct ConversationsPage {
    response: ConversationsBody,
}

#[derive(Debug, Deserialize)]
struct ConversationsBody {
    #[serde(default)]
    conversations: Vec<Conversation>,
}

/// Result of resolution: the chosen conversation and who is who.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub conversation_id: String,
    pub identities: IdentityMap,
}

/// First page of the conversations feed for `blog`.
pub fn conversations_path(blog: &str, now_millis: i64) -> String {
    format!(
        "/svc/conversations?participant={}&_={}",
        blog_host(blog),
        now_millis
    )
}

/// Accumulates identities and menu entries page by page.
struct ConversationScan<'t> {
    blog_host: String,
    target: &'t ConversationTarget,
    identities: IdentityMap,
    menu: Vec<Conversation>,
    chosen: Option<String>,
    error: Option<Error>,
}

impl<'t> ConversationScan<'t> {
    fn new(blog: &str, target: &'t ConversationTarget) -> Self {
        Self {
            blog_host: blog_host(blog),
            target,
            identities: IdentityMap::new(),
            menu: Vec::new(),
            chosen: None,
            error: None,
        }
    }

    fn is_self(&self, participant: &Participant) -> bool {
        format!("{}{}", participant.name, BLOG_SUFFIX) == self.blog_host
    }

    fn is_target(&self, conversation: &Conversation) -> bool {
        match self.target {
            ConversationTarget::Id(id) => conversation.id == *id,
            ConversationTarget::Counterpart(name) => {
                conversation.participants.iter().any(|p| p.name == *name)
            }
            ConversationTarget::Interactive => false,
        }
    }

    fn record(&mut self, conversation: &Conversation) {
        for participant in &conversation.participants {
            self.identities
                .insert(participant.uuid.clone(), participant.name.clone());
        }
    }

    fn on_page(&mut self, page: &Value) -> ControlFlow<()> {
        let page: ConversationsPage = match serde_json::from_value(page.clone()) {
            Ok(page) => page,
            Err(e) => {
                self.error = Some(Error::ProtocolShape(format!("conversations feed: {}", e)));
                return ControlFlow::Break(());
            }
        };

        for conversation in page.response.conversations {
            for participant in &conversation.participants {
                if self.is_self(participant) {
                    self.identities
                        .insert(participant.uuid.clone(), participant.name.clone());
                }
            }

            if self.is_target(&conversation) {
                self.record(&conversation);
                self.chosen = Some(conversation.id);
                return ControlFlow::Break(());
            }

            if !self.menu.iter().any(|c| c.id == conversation.id) {
                self.menu.push(conversation);
            }
        }
        ControlFlow::Continue(())
    }

    /// Ask until the operator picks a valid 1-based menu entry.
    fn choose(&mut self, prompter: &mut dyn Prompter) -> Result<String> {
        if self.menu.is_empty() {
            return Err(Error::ConversationNotFound(format!(
                "no conversations for {}",
                self.blog_host
            )));
        }

        let mut listing = String::from("Conversations:");
        for (i, conversation) in self.menu.iter().enumerate() {
            listing.push('\n');
            listing.push_str(&conversation.menu_line(i + 1));
        }
        prompter.show(&listing)?;

        let index = loop {
            let answer = prompter.ask("Select conversation by number: ")?;
            match answer.parse::<usize>() {
                Ok(n) if (1..=self.menu.len()).contains(&n) => break n - 1,
                _ => debug!(answer, "invalid selection"),
            }
        };

        let conversation = self.menu.swap_remove(index);
        self.record(&conversation);
        prompter.show(&format!("Selected conversation ID: {}", conversation.id))?;
        Ok(conversation.id)
    }
}

/// Find the conversation to export and the identities of its participants.
pub async fn resolve(
    session: &Session,
    blog: &str,
    target: &ConversationTarget,
    page_retries: u32,
    prompter: &mut dyn Prompter,
) -> Result<Resolved> {
    info!("Fetching conversations...");
    let mut scan = ConversationScan::new(blog, target);
    let path = conversations_path(blog, chrono::Utc::now().timestamp_millis());

    let summary = Pager::new(session)
        .with_retries(page_retries)
        .fetch_all(&path, CONVERSATIONS_NEXT, |page| scan.on_page(page))
        .await;
    debug!(pages = summary.pages, "conversations scanned");

    if let Some(err) = scan.error.take() {
        return Err(err);
    }

    let conversation_id = match scan.chosen.take() {
        Some(id) => id,
        None => {
            if *target != ConversationTarget::Interactive {
                warn!(wanted = ?target, "conversation not found, falling back to selection");
            }
            scan.choose(prompter)?
        }
    };

    Ok(Resolved {
        conversation_id,
        identities: scan.identities,
    })
}
