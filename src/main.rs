//! Tumblr chat exporter CLI - main entry point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dialoguer::{Input, Password};
use tracing_subscriber::EnvFilter;

use tumblr_chat_export::clock::parse_date;
use tumblr_chat_export::commands::{self, ExportArgs};
use tumblr_chat_export::config::normalize_blog;
use tumblr_chat_export::{
    Clock, Config, ConversationTarget, Credentials, Error, TerminalPrompter,
};

#[derive(Parser)]
#[command(name = "tumblr_chat_export")]
#[command(about = "Export a Tumblr direct-message conversation as a chronological transcript", long_about = None)]
#[command(version)]
struct Cli {
    /// Tumblr email (prompted if omitted)
    #[arg(short = 'u', long = "username", env = "TUMBLR_EMAIL")]
    username: Option<String>,

    /// Password (prompted if omitted)
    #[arg(short = 'p', long, env = "TUMBLR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Blog name, with or without .tumblr.com (prompted if omitted)
    #[arg(short, long, env = "TUMBLR_BLOG")]
    blog: Option<String>,

    /// 2FA code (prompted when the login asks for one)
    #[arg(short = 't', long = "tfa")]
    tfa: Option<String>,

    /// Conversation id (menu if neither this nor --partner is set)
    #[arg(short, long)]
    conversation: Option<String>,

    /// Blog name of the other participant
    #[arg(long)]
    partner: Option<String>,

    /// Keep messages from this date on (YYYYMMDD or YYYY-MM-DD)
    #[arg(short, long)]
    date: Option<String>,

    /// Requests per minute while paging messages
    #[arg(short, long)]
    rate: Option<u32>,

    /// Write the transcript to this file instead of the terminal
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// With --output: one file per day, date inserted before the extension
    #[arg(long, default_value_t = false)]
    split: bool,

    /// Disable TLS certificate verification (not recommended)
    #[arg(short = 's', long = "skip-ssl", default_value_t = false)]
    skip_ssl: bool,

    /// Do not offer to save terminal output to a file
    #[arg(long, default_value_t = false)]
    no_save_prompt: bool,

    /// Configuration file (defaults to ./config.yml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn read_plain_input(prompt: &str) -> anyhow::Result<String> {
    let input: String = Input::new().with_prompt(prompt).interact_text()?;
    Ok(input.trim().to_string())
}

fn read_secret_input(prompt: &str) -> anyhow::Result<String> {
    let input = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(false)
        .interact()?;
    Ok(input.trim().to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_file(path)
            .map_err(Error::Config)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::new()),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;

    let cutoff = cli
        .date
        .as_deref()
        .map(parse_date)
        .transpose()
        .map_err(Error::InvalidArgument)?;

    let blog = match non_empty(cli.blog).or_else(|| non_empty(Some(config.blog.clone()))) {
        Some(blog) => blog,
        None => read_plain_input("Enter blog name (without .tumblr.com)")?,
    };
    let email = match non_empty(cli.username).or_else(|| non_empty(Some(config.email.clone()))) {
        Some(email) => email,
        None => read_plain_input("Enter email")?,
    };
    let password = match non_empty(cli.password) {
        Some(password) => password,
        None => read_secret_input("Enter password")?,
    };

    let mut credentials = Credentials::new(email, password);
    if let Some(code) = non_empty(cli.tfa) {
        credentials = credentials.with_challenge_code(code);
    }

    let args = ExportArgs {
        credentials,
        blog: normalize_blog(&blog),
        target: ConversationTarget::from_options(cli.conversation, cli.partner),
        cutoff,
        rate_limit: cli.rate.filter(|r| *r > 0),
        output: cli.output,
        split: cli.split || config.split,
        skip_ssl: cli.skip_ssl,
        offer_capture: !cli.no_save_prompt,
        clock: Clock::Local,
    };

    let mut prompter = TerminalPrompter::stdio();
    let mut screen = std::io::stdout();
    let report = commands::export_run(&config, &args, &mut prompter, &mut screen).await?;

    for file in &report.files {
        tracing::info!(file = %file.display(), "saved");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env before clap reads its env fallbacks
    let _ = dotenvy::dotenv();

    // Initialize logging; stdout is reserved for the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
