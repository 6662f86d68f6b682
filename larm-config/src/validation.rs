// larm-config/src/validation.rs
//! Custom validation functions for configuration.

use validator::ValidationError;

/// Channel names are short identifiers such as `mail`, `url` or `stop`.
pub fn validate_channel_name(name: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^[a-zA-Z0-9_-]{1,32}$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_channel_name"))
    }
}

/// Accepts `user@host` or `Name <user@host>`.
pub fn validate_mailbox(mailbox: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new(r"^([^<>]*<)?[^@\s<>]+@[^@\s<>]+>?$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(mailbox.trim()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_mailbox"))
    }
}

pub fn validate_http_method(method: &str) -> Result<(), ValidationError> {
    let valid = ["GET", "POST", "PUT", "PATCH", "DELETE"].contains(&method.to_uppercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_http_method"))
    }
}

/// Validate log level.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"].contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}
