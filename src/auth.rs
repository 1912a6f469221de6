use std::fmt;

use reqwest::Url;
use tracing::info;

use crate::error::EsgfError;

pub const USERNAME_VAR: &str = "ESGF_USERNAME";
pub const PASSWORD_VAR: &str = "ESGF_PASSWORD";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Result<Self, EsgfError> {
        let username = username.map(|value| value.trim().to_string());
        let password = password.filter(|value| !value.trim().is_empty());
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Ok(Self { username, password })
            }
            _ => Err(EsgfError::MissingCredentials),
        }
    }

    pub fn from_env() -> Result<Self, EsgfError> {
        Self::new(
            std::env::var(USERNAME_VAR).ok(),
            std::env::var(PASSWORD_VAR).ok(),
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Credential context established once per run and shared by every transfer.
#[derive(Debug, Clone)]
pub struct Session {
    host: String,
    trusted: Vec<String>,
    credentials: Credentials,
}

impl Session {
    /// Binds the credentials to the identity provider host. Only the host
    /// name is validated; no network handshake happens here.
    pub fn establish(credentials: Credentials, host: &str) -> Result<Self, EsgfError> {
        let host = normalize_host(host)?;
        info!(host = %host, user = %credentials.username, "ESGF session ready");
        Ok(Self {
            trusted: vec![host.clone()],
            host,
            credentials,
        })
    }

    /// Also sends credentials to `host`, e.g. the preferred data node.
    pub fn trust(mut self, host: &str) -> Result<Self, EsgfError> {
        let host = normalize_host(host)?;
        if !self.trusted.contains(&host) {
            self.trusted.push(host);
        }
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Credentials only travel over https to a trusted host.
    pub fn authorizes(&self, url: &Url) -> bool {
        url.scheme() == "https"
            && url.host_str().is_some_and(|host| {
                self.trusted
                    .iter()
                    .any(|trusted| trusted.eq_ignore_ascii_case(host))
            })
    }
}

fn normalize_host(host: &str) -> Result<String, EsgfError> {
    let host = host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
        return Err(EsgfError::InvalidIdentityHost(host.to_string()));
    }
    Ok(host.to_ascii_lowercase())
}
