//! Small helpers shared by the zkflow crates: path handling, identifier
//! sanitizing, atomic file writes, and secret redaction for log output.

use regex::Regex;

pub mod file_io;
pub mod path_processing;

pub use file_io::write_atomic;
pub use path_processing::{expand_tilde, sanitize_identifier};

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let patterns = [
        r"(?i)(authorization: (?:bearer )?)([\w\-\.=:/+]+)",
        r"(?i)(bearer )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
        r"(?i)([?&](?:api_key|token|access_token)=)([^\s&]+)",
    ];
    let mut redacted = input.to_string();
    for pattern in patterns {
        let Ok(regex) = Regex::new(pattern) else {
            continue;
        };
        redacted = regex
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}
