//! Launch tokens.
//!
//! A token is the standard base64 of SHA-512 over the UTF-32LE encoding of
//! a phrase naming the launch mode (and, for file jobs, both paths).

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode<'a> {
    File { src: &'a str, dst: &'a str },
    Server,
}

impl Mode<'_> {
    fn phrase(&self) -> String {
        match self {
            Mode::File { src, dst } => format!("!hello file {src}|{dst}h4x0r!"),
            Mode::Server => "!hello server h4x0r!".to_string(),
        }
    }
}

impl fmt::Display for Mode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::File { .. } => f.write_str("file"),
            Mode::Server => f.write_str("server"),
        }
    }
}

pub fn token_for(mode: Mode<'_>) -> String {
    let mut hasher = Sha512::new();
    for ch in mode.phrase().chars() {
        hasher.update(u32::from(ch).to_le_bytes());
    }
    STANDARD.encode(hasher.finalize())
}

pub fn verify(mode: Mode<'_>, token: &str) -> bool {
    token_for(mode) == token.trim()
}
