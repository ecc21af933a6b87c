//! Direct database connection profile

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default MySQL port
pub const DEFAULT_PORT: u16 = 3306;

/// Server connection details entered on the connect step
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionProfile {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// The part of the profile that may be remembered
    pub fn history(&self) -> ConnectionHistory {
        ConnectionHistory {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Remembered connection details, never including the password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHistory {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl ConnectionHistory {
    /// Pre-fill a profile from history; the password must be entered again
    pub fn into_profile(self, password: impl Into<String>) -> ConnectionProfile {
        ConnectionProfile {
            host: self.host,
            port: self.port,
            username: self.username,
            password: password.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_drops_password() {
        let profile = ConnectionProfile::new("db.example.com", DEFAULT_PORT, "reader", "s3cret");
        let json = serde_json::to_string(&profile.history()).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!format!("{:?}", profile).contains("s3cret"));
        assert_eq!(profile.history().into_profile("s3cret"), profile);
    }
}
