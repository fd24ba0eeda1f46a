//! Export one conversation: login, resolve, collect, write.

use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::info;

use crate::auth::{authenticate, Credentials};
use crate::clock::Clock;
use crate::config::Config;
use crate::conversations::{resolve, ConversationTarget};
use crate::error::Result;
use crate::messages::{collect, CollectOptions};
use crate::prompt::Prompter;
use crate::session::{SessionLock, WebClient};
use crate::transcript::{emit, Destination, EmitReport};

/// Resolved inputs of one export run.
#[derive(Debug, Clone)]
pub struct ExportArgs {
    pub credentials: Credentials,
    pub blog: String,
    pub target: ConversationTarget,
    pub cutoff: Option<NaiveDate>,
    pub rate_limit: Option<u32>,
    pub output: Option<PathBuf>,
    pub split: bool,
    pub skip_ssl: bool,
    /// Offer to save the screen output when no output file is set.
    pub offer_capture: bool,
    pub clock: Clock,
}

/// Answer to the save prompt counts as yes.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub async fn run(
    config: &Config,
    args: &ExportArgs,
    prompter: &mut dyn Prompter,
    screen: &mut dyn Write,
) -> Result<EmitReport> {
    let _lock = SessionLock::acquire(&config.lock_file)?;

    let client = WebClient::new(&config.base_url, args.skip_ssl)?;
    let session = authenticate(
        client,
        &args.credentials,
        config.max_login_attempts,
        prompter,
    )
    .await?;

    let resolved = resolve(
        &session,
        &args.blog,
        &args.target,
        config.page_retries,
        prompter,
    )
    .await?;
    info!(conversation_id = %resolved.conversation_id, "conversation resolved");

    let mut destination = Destination::from_options(args.output.clone(), args.split);
    if destination == Destination::Stdout && args.offer_capture {
        let answer = prompter.ask("Do you want to save the conversation to a file? (y/N): ")?;
        if is_yes(&answer) {
            destination =
                Destination::Capture(PathBuf::from(format!("{}.txt", resolved.conversation_id)));
        }
    }

    let options = CollectOptions {
        cutoff: args.cutoff,
        rate_limit: args.rate_limit.or(config.rate_limit),
        page_retries: config.page_retries,
        clock: args.clock,
    };
    let transcript = collect(
        &session,
        &resolved.conversation_id,
        &args.blog,
        &resolved.identities,
        &options,
    )
    .await;

    emit(&transcript, &destination, &args.clock, screen)
}
