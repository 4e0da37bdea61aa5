use std::path::PathBuf;

use anyhow::{Result, bail};
use dirs_next::home_dir;

/// Expand a leading `~` in a user supplied path.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Validate an identifier that is about to become part of a file name.
///
/// Only ASCII alphanumerics, `_` and `-` are accepted so identifiers can never
/// escape the directory they are joined onto.
pub fn sanitize_identifier(identifier: &str) -> Result<String> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        bail!("identifier cannot be empty");
    }
    if trimmed
        .chars()
        .any(|character| !(character.is_ascii_alphanumeric() || character == '_' || character == '-'))
    {
        bail!("identifier contains unsupported characters: '{trimmed}'");
    }
    Ok(trimmed.to_string())
}
