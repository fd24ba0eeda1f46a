//! Session management for the Tumblr web client
//!
//! Provides:
//! - File-based session lock (mode 0600) to prevent parallel logins
//! - The cookie-carrying HTTP client shared by every request
//! - The authenticated `Session` value handed to the fetchers

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use reqwest::cookie::Jar;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::{Error, Result};

/// Session lock guard that ensures only one export logs in at a time.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock at `path`, creating it readable by the owner only.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let lock_file = options
            .open(&path)
            .map_err(|e| Error::SecureStorage(format!("{}: {}", path.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            lock_file
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::SecureStorage(format!("{}: {}", path.display(), e)))?;
        }

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "session lock acquired");
                Ok(Self {
                    path,
                    lock_file: Some(lock_file),
                })
            }
            Err(_) => Err(Error::SessionLocked),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// HTTP client bound to one host, with an in-memory cookie jar.
#[derive(Debug, Clone)]
pub struct WebClient {
    http: Client,
    base_url: String,
}

impl WebClient {
    /// Build a client for `base_url`. `skip_ssl` disables certificate checks.
    pub fn new(base_url: &str, skip_ssl: bool) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("tumblr_chat_export/{}", env!("CARGO_PKG_VERSION")))
            .cookie_provider(Arc::new(Jar::default()))
            .danger_accept_invalid_certs(skip_ssl)
            .build()
            .map_err(|e| Error::CapabilityMissing(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether `url` has the scheme, host and port of `base_url`.
    pub fn is_same_origin(&self, url: &str) -> bool {
        match (Url::parse(&self.base_url), Url::parse(url)) {
            (Ok(base), Ok(url)) => base.origin() == url.origin(),
            _ => false,
        }
    }

    /// Resolve a path or server-supplied relative link against the host.
    pub fn url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{}{}", self.base_url, href)
        } else {
            format!("{}/{}", self.base_url, href)
        }
    }
}

/// Authenticated state: the bearer token plus the cookies the login set.
///
/// Cookies live only in memory and go away with the value.
#[derive(Debug, Clone)]
pub struct Session {
    client: WebClient,
    auth_token: String,
}

impl Session {
    pub(crate) fn new(client: WebClient, auth_token: String) -> Self {
        Self { client, auth_token }
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn client(&self) -> &WebClient {
        &self.client
    }

    pub fn url(&self, href: &str) -> String {
        self.client.url(href)
    }
}
