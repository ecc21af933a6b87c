//! Session model and related functionality

use serde::{Deserialize, Serialize};

/// Client-side view of an authenticated session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token, absent when logged out
    pub token: Option<String>,
    /// Expiry as Unix epoch seconds
    pub expires_at: i64,
    /// Display name of the authenticated subject
    pub subject_name: String,
}

impl Session {
    /// A session is active iff it holds a token and `now` is before expiry
    pub fn is_active_at(&self, now_epoch_seconds: i64) -> bool {
        self.token.is_some() && now_epoch_seconds < self.expires_at
    }

    pub fn is_logged_out(&self) -> bool {
        self.token.is_none()
    }
}

/// User information returned by the backend (never includes the password)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub status: String,
}

/// Successful login payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    pub token: String,
    /// Expiry as Unix epoch seconds
    pub expires_at: i64,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

impl LoginGrant {
    /// Name to show for the session, falling back to the login name
    pub fn subject_name(&self, login_name: &str) -> String {
        match &self.user {
            Some(user) if !user.display_name.is_empty() => user.display_name.clone(),
            Some(user) if !user.username.is_empty() => user.username.clone(),
            _ => login_name.to_string(),
        }
    }
}
