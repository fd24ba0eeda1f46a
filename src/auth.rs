//! Web login handshake
//!
//! Three requests on one cookie jar: fetch the login page and pull the
//! embedded API token out of it, announce the email, then exchange the
//! password (and a second-factor code when the service asks for one) at the
//! token endpoint.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::prompt::Prompter;
use crate::session::{Session, WebClient};

pub const LOGIN_PATH: &str = "/login";
pub const LOGIN_MODE_PATH: &str = "/api/v2/login/mode";
pub const TOKEN_PATH: &str = "/api/v2/oauth2/token";

static API_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""API_TOKEN":"(.*?)""#).expect("API_TOKEN pattern"));

/// Login identity and secret, plus a second-factor code if already known.
#[derive(Clone, Default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub challenge_code: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            challenge_code: None,
        }
    }

    pub fn with_challenge_code(mut self, code: impl Into<String>) -> Self {
        self.challenge_code = Some(code.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .field("challenge_code", &self.challenge_code.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Pull the bearer token out of the login page.
pub fn extract_api_token(page: &str) -> Result<String> {
    API_TOKEN_RE
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            Error::ProtocolShape(
                "API_TOKEN not found on the login page, Tumblr layout may have changed".to_string(),
            )
        })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum TokenOutcome {
    Granted,
    Refused {
        description: String,
        wants_challenge: bool,
    },
}

fn parse_token_response(body: &str) -> Result<TokenOutcome> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| Error::ProtocolResponse(e.to_string()))?;

    let error = match response.error {
        None | Some(serde_json::Value::Null) => return Ok(TokenOutcome::Granted),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    };

    let description = response.error_description.unwrap_or_default();
    let wants_challenge = description.to_lowercase().contains("tfa_token");
    let description = if description.is_empty() { error } else { description };

    Ok(TokenOutcome::Refused {
        description,
        wants_challenge,
    })
}

/// Log in and return the authenticated session.
///
/// The password step repeats only while the service asks for a second-factor
/// code that has not been supplied; at most `max_attempts` token requests are
/// made.
pub async fn authenticate(
    client: WebClient,
    credentials: &Credentials,
    max_attempts: u32,
    prompter: &mut dyn Prompter,
) -> Result<Session> {
    info!("Fetching auth token...");
    let page = client
        .http()
        .get(client.url(LOGIN_PATH))
        .send()
        .await?
        .text()
        .await?;
    let token = extract_api_token(&page)?;
    debug!("API token extracted");

    info!("Sending username...");
    client
        .http()
        .post(client.url(LOGIN_MODE_PATH))
        .bearer_auth(&token)
        .form(&[
            ("authentication", "oauth2_cookie"),
            ("email", credentials.email.as_str()),
        ])
        .send()
        .await?;

    let mut challenge = credentials
        .challenge_code
        .clone()
        .filter(|c| !c.trim().is_empty());
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!(attempt, "Sending password...");

        let mut form = vec![
            ("grant_type", "password"),
            ("username", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
        ];
        if let Some(code) = challenge.as_deref() {
            form.push(("tfa_token", code));
        }

        let body = client
            .http()
            .post(client.url(TOKEN_PATH))
            .bearer_auth(&token)
            .form(&form)
            .send()
            .await?
            .text()
            .await?;

        match parse_token_response(&body)? {
            TokenOutcome::Granted => {
                info!("Login successful!");
                return Ok(Session::new(client, token));
            }
            TokenOutcome::Refused {
                wants_challenge: true,
                ..
            } if challenge.is_none() => {
                if attempt >= max_attempts {
                    return Err(Error::AuthExhausted(max_attempts));
                }
                let code = prompter.ask("Enter 2FA code: ")?;
                if code.is_empty() {
                    warn!("empty 2FA code entered");
                }
                challenge = Some(code).filter(|c| !c.is_empty());
            }
            TokenOutcome::Refused { description, .. } => {
                return Err(Error::AuthRejected(description));
            }
        }
    }
}
