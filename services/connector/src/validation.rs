//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

use crate::{
    error::{WorkflowError, WorkflowResult},
    models::ConnectionProfile,
};

/// Validate a login name
pub fn validate_username(username: &str) -> WorkflowResult<()> {
    if username.trim().is_empty() {
        return Err(WorkflowError::validation("username", "Username is required"));
    }

    if username.len() > 64 {
        return Err(WorkflowError::validation(
            "username",
            "Username must be at most 64 characters long",
        ));
    }

    Ok(())
}

/// Validate a password
pub fn validate_password(password: &str) -> WorkflowResult<()> {
    if password.is_empty() {
        return Err(WorkflowError::validation("password", "Password is required"));
    }

    Ok(())
}

/// Validate a database host name or IPv4 address
pub fn validate_host(host: &str) -> WorkflowResult<()> {
    if host.trim().is_empty() {
        return Err(WorkflowError::validation("host", "Database host is required"));
    }

    if host.len() > 253 {
        return Err(WorkflowError::validation(
            "host",
            "Database host must be at most 253 characters long",
        ));
    }

    static HOST_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = HOST_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
            .expect("Failed to compile host regex")
    });

    if !regex.is_match(host) {
        return Err(WorkflowError::validation(
            "host",
            "Database host must be a host name or an IP address",
        ));
    }

    Ok(())
}

/// Validate a TCP port
pub fn validate_port(port: u16) -> WorkflowResult<()> {
    if port == 0 {
        return Err(WorkflowError::validation("port", "Port is required"));
    }

    Ok(())
}

/// Validate every field of a connection profile
pub fn validate_connection(profile: &ConnectionProfile) -> WorkflowResult<()> {
    validate_host(&profile.host)?;
    validate_port(profile.port)?;
    validate_username(&profile.username)?;
    validate_password(&profile.password)?;
    Ok(())
}

/// Validate custom query text, returning the trimmed query
pub fn validate_custom_query(query: &str) -> WorkflowResult<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::validation(
            "customQuery",
            "Please enter a SQL statement",
        ));
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_validation() {
        assert!(validate_host("192.168.1.100").is_ok());
        assert!(validate_host("db.example.com").is_ok());
        assert!(validate_host("localhost").is_ok());
        assert!(validate_host("").is_err());
        assert!(validate_host("bad host").is_err());
        assert!(validate_host("-leading.example.com").is_err());
    }

    #[test]
    fn test_connection_validation_reports_field() {
        let profile = ConnectionProfile::new("db.example.com", 3306, "reader", "");
        match validate_connection(&profile) {
            Err(WorkflowError::Validation { field, .. }) => assert_eq!(field, "password"),
            other => panic!("unexpected result: {:?}", other),
        }

        let profile = ConnectionProfile::new("db.example.com", 0, "reader", "pw");
        assert!(validate_connection(&profile).is_err());
    }

    #[test]
    fn test_custom_query_is_trimmed() {
        assert_eq!(
            validate_custom_query("  select 1 \n").unwrap(),
            "select 1"
        );
        assert!(validate_custom_query("   ").is_err());
    }
}
