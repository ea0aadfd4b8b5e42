//! Registry credentials.
//!
//! Credentials are only passed through to the transports; storing and
//! looking them up is left to the caller.

use std::fmt;

use bollard::auth::DockerCredentials;

/// Username and password for a registry or artifact repository.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password or token.
    pub password: Option<String>,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Engine registry auth for `server`.
    #[must_use]
    pub fn to_docker_credentials(&self, server: &str) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: self.password.clone(),
            serveraddress: Some(server.to_string()),
            ..DockerCredentials::default()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
