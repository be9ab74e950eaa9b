//! Identity newtypes and the collision-checked identity generator.
//!
//! Connection and request identities are opaque strings. Locally generated
//! ones are a short prefix plus 21 random alphanumeric characters, but a
//! `RequestId` received from a peer is accepted verbatim.
//!
//! [`IdGenerator`] draws from an [`IdSource`] and re-draws while the caller's
//! existence check reports a collision, up to [`MAX_ID_ATTEMPTS`] times.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::errors::IdError;

/// Upper bound on draws before [`IdGenerator::generate`] gives up.
pub const MAX_ID_ATTEMPTS: usize = 64;

/// Length of the random part of a generated identity.
const RANDOM_ID_LEN: usize = 21;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string value.
            #[must_use]
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Server-scoped identity of one open connection.
    ConnectionId
);
branded_id!(
    /// Correlation identity of a roll request, scoped to its issuer's pending table.
    RequestId
);

/// Source of candidate identifiers.
pub trait IdSource: Send {
    /// Draw one candidate. Candidates may repeat.
    fn draw(&mut self) -> String;
}

/// Draws 21 random alphanumeric characters per candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn draw(&mut self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_ID_LEN)
            .map(char::from)
            .collect()
    }
}

/// Replays a fixed list of candidates, then repeats the last one forever.
///
/// Useful wherever identities must be predictable, e.g. to force collisions.
#[derive(Debug, Clone)]
pub struct SequenceIdSource {
    queue: VecDeque<String>,
    last: String,
}

impl SequenceIdSource {
    /// Create a source that yields `candidates` in order.
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: candidates.into_iter().map(Into::into).collect(),
            last: String::new(),
        }
    }
}

impl IdSource for SequenceIdSource {
    fn draw(&mut self) -> String {
        if let Some(next) = self.queue.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

/// Produces identities unique against a caller-supplied lookup.
pub struct IdGenerator {
    prefix: &'static str,
    source: Mutex<Box<dyn IdSource>>,
}

impl IdGenerator {
    /// Random generator whose identities start with `{prefix}_`.
    pub fn new(prefix: &'static str) -> Self {
        Self::with_source(prefix, RandomIdSource)
    }

    /// Generator for connection identities (`conn_…`).
    pub fn connections() -> Self {
        Self::new("conn")
    }

    /// Generator for request identities (`roll_…`).
    pub fn requests() -> Self {
        Self::new("roll")
    }

    /// Generator drawing from an explicit source. An empty prefix leaves
    /// candidates untouched.
    pub fn with_source(prefix: &'static str, source: impl IdSource + 'static) -> Self {
        Self {
            prefix,
            source: Mutex::new(Box::new(source)),
        }
    }

    /// Draw until `exists` reports the candidate unused.
    pub fn generate(&self, exists: impl Fn(&str) -> bool) -> Result<String, IdError> {
        let mut source = self.source.lock();
        for _ in 0..MAX_ID_ATTEMPTS {
            let raw = source.draw();
            let candidate = if self.prefix.is_empty() {
                raw
            } else {
                format!("{}_{raw}", self.prefix)
            };
            if !exists(&candidate) {
                return Ok(candidate);
            }
            tracing::trace!(candidate, "identity collision, redrawing");
        }
        Err(IdError::Exhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
