use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Regex to match the requirements of hostname(7), needed to have peers also
/// be reachable DNS labels. Full-length is checked separately (max 63 chars).
static LABEL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DnsLabelError {
    #[error("label is empty after normalization")]
    Empty,
    #[error("label exceeds 63 characters after normalization")]
    TooLong,
}

/// Normalizes an arbitrary hostname into a syntactically valid DNS label:
/// lowercases it, replaces any run of characters outside `[a-z0-9-]` with a
/// single dash, and trims leading/trailing dashes. Mirrors the `GetParsedDomainLabel`
/// behavior of normalizing client-reported hostnames into usable DNS labels.
pub fn parse_domain_label(hostname: &str) -> Result<String, DnsLabelError> {
    let lowered = hostname.to_lowercase();
    let mut label = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            label.push(c);
            last_was_dash = false;
        } else if !last_was_dash && !label.is_empty() {
            label.push('-');
            last_was_dash = true;
        }
    }
    while label.ends_with('-') {
        label.pop();
    }

    if label.is_empty() {
        return Err(DnsLabelError::Empty);
    }
    if label.len() > 63 {
        return Err(DnsLabelError::TooLong);
    }
    debug_assert!(LABEL_REGEX.is_match(&label));
    Ok(label)
}
