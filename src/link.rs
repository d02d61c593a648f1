//! Canonicalization of user-submitted links.
//!
//! Users paste links in several shapes: a plain URL, a base64-encoded URL,
//! a `Link:`/`Key:` pair of base64 fragments, or an `M:`/`K:` pair of raw
//! fragments. All of them normalize to a `https://mega...` URL.

use std::sync::LazyLock;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use regex::Regex;
use thiserror::Error;

const ACCEPTED_PREFIX: &str = "https://mega";
const MEGA_ROOT: &str = "https://mega.nz/";

static LINK_FIELD: LazyLock<Regex> = LazyLock::new(|| field_regex("Link"));
static KEY_FIELD: LazyLock<Regex> = LazyLock::new(|| field_regex("Key"));
static FOLDER_FIELD: LazyLock<Regex> = LazyLock::new(|| field_regex("M"));
static FOLDER_KEY_FIELD: LazyLock<Regex> = LazyLock::new(|| field_regex("K"));

fn field_regex(label: &str) -> Regex {
    Regex::new(&format!(r"{label}:\s*(.*)")).expect("static field pattern is valid")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("empty link")]
    Empty,
    #[error("not a recognized link: {0}")]
    Unrecognized(String),
}

/// Normalize a submitted string to a canonical link URL.
pub fn decode_url(input: &str) -> Result<String, LinkError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LinkError::Empty);
    }

    let mut url = decode_ascii(trimmed).unwrap_or_else(|| trimmed.to_string());

    if let (Some(link), Some(key)) = (capture(&LINK_FIELD, &url), capture(&KEY_FIELD, &url)) {
        if let (Some(link), Some(key)) = (decode_ascii(link), decode_ascii(key)) {
            url = link + &key;
        }
    }

    if let (Some(folder), Some(key)) = (
        capture(&FOLDER_FIELD, &url),
        capture(&FOLDER_KEY_FIELD, &url),
    ) {
        url = format!("{MEGA_ROOT}{folder}{key}");
    }

    let url = url.trim();
    if url.starts_with(ACCEPTED_PREFIX) {
        Ok(url.to_string())
    } else {
        Err(LinkError::Unrecognized(trimmed.to_string()))
    }
}

fn capture<'a>(pattern: &Regex, text: &'a str) -> Option<&'a str> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Decode base64 into a string, accepting only ASCII output.
fn decode_ascii(encoded: &str) -> Option<String> {
    let bytes = STANDARD
        .decode(encoded)
        .or_else(|_| STANDARD_NO_PAD.decode(encoded))
        .ok()?;
    if !bytes.is_ascii() {
        return None;
    }
    String::from_utf8(bytes).ok()
}
