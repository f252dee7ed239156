//! Incremental content digests.
//!
//! An [Accumulator] is fed the chunks of one upload in arrival order. Chunk boundaries
//! have no effect on the result: feeding `foobar` at once or as `foo` and `bar` yields the
//! same digest.
//!
//! [Accumulator::finalize] consumes the accumulator, so a finalized state can never be
//! updated again.
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use sha1::Sha1;
use sha2::{Sha256, Digest};


/// Hash algorithm used to name published content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl Default for DigestAlgorithm {
    fn default() -> DigestAlgorithm {
        DigestAlgorithm::Sha1
    }
}

impl DigestAlgorithm {
    /// Length of the hex encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha1 => fmt.write_str("sha1"),
            DigestAlgorithm::Sha256 => fmt.write_str("sha256"),
        }
    }
}

#[derive(Debug)]
pub struct UnknownAlgorithm(String);

impl Error for UnknownAlgorithm {}

impl fmt::Display for UnknownAlgorithm {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "unknown digest algorithm: {}", self.0)
    }
}

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<DigestAlgorithm, UnknownAlgorithm> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

enum State {
    Sha1(Sha1),
    Sha256(Sha256),
}

/// Running hash over the chunks of a single byte stream.
pub struct Accumulator {
    state: State,
}

impl Accumulator {
    pub fn new(algorithm: DigestAlgorithm) -> Accumulator {
        let state = match algorithm {
            DigestAlgorithm::Sha1 => State::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => State::Sha256(Sha256::new()),
        };
        Accumulator {
            state,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            State::Sha1(h) => h.update(chunk),
            State::Sha256(h) => h.update(chunk),
        }
    }

    /// Lowercase hex digest of everything passed to [update](Accumulator::update).
    pub fn finalize(self) -> String {
        match self.state {
            State::Sha1(h) => hex::encode(h.finalize()),
            State::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}
