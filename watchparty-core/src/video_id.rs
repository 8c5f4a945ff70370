//! Video Id Parsing
//!
//! Extracts the 11-character video id out of the URL shapes users paste
//! (watch, short, and embed links), or accepts a bare id.

use std::fmt;

use thiserror::Error;

/// Length of a video id
const ID_LENGTH: usize = 11;

/// Errors produced when extracting an id from user input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoUrlError {
    #[error("no video id found in URL")]
    NoId,
}

/// A validated 11-character video id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    /// Parse a bare id
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.len() == ID_LENGTH && trimmed.bytes().all(is_id_byte) {
            Some(VideoId(trimmed.to_string()))
        } else {
            None
        }
    }

    /// Extract the id from a pasted URL, or accept a bare id.
    ///
    /// An id candidate starts right after `v=` or a path slash and must be
    /// terminated by the end of input or a `&` query separator.
    pub fn from_url(url: &str) -> Result<Self, VideoUrlError> {
        let url = url.trim();
        if let Some(id) = Self::parse(url) {
            return Ok(id);
        }

        for (idx, _) in url.match_indices("v=") {
            if let Some(id) = candidate(&url[idx + 2..]) {
                return Ok(id);
            }
        }
        for (idx, _) in url.match_indices('/') {
            if let Some(id) = candidate(&url[idx + 1..]) {
                return Ok(id);
            }
        }

        Err(VideoUrlError::NoId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn candidate(rest: &str) -> Option<VideoId> {
    let bytes = rest.as_bytes();
    if bytes.len() < ID_LENGTH {
        return None;
    }
    if !bytes[..ID_LENGTH].iter().copied().all(is_id_byte) {
        return None;
    }
    match bytes.get(ID_LENGTH) {
        None | Some(b'&') => Some(VideoId(rest[..ID_LENGTH].to_string())),
        _ => None,
    }
}
