//! Tumblr Direct Message Exporter Library
//!
//! This library provides tools to:
//! - Log in to the Tumblr web app, including the second-factor step
//! - Walk the cursor-paginated conversation and message feeds
//! - Resolve a conversation by id, by counterpart, or from a menu
//! - Normalize text, image and post messages into a chronological transcript
//! - Write the transcript to the terminal, one file, or one file per day

pub mod auth;
pub mod clock;
pub mod config;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod pager;
pub mod prompt;
pub mod session;
pub mod transcript;

// Re-export common types
pub use auth::{authenticate, Credentials};
pub use clock::Clock;
pub use config::Config;
pub use conversations::{ConversationTarget, IdentityMap, Resolved};
pub use error::{Error, Result};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use session::{Session, SessionLock, WebClient};
pub use transcript::{Destination, Transcript};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
