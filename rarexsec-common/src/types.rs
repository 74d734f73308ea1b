//! Identifier types shared between the extractor, the stores and the catalogue

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (run, subrun) pair identifying one acquisition sub-segment
///
/// Serializes as a two-element array `[run, subrun]`. Ordering is run-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunSubrun(pub i64, pub i64);

impl RunSubrun {
    pub fn new(run: i64, subrun: i64) -> Self {
        Self(run, subrun)
    }

    pub fn run(&self) -> i64 {
        self.0
    }

    pub fn subrun(&self) -> i64 {
        self.1
    }
}

impl From<(i64, i64)> for RunSubrun {
    fn from((run, subrun): (i64, i64)) -> Self {
        Self(run, subrun)
    }
}

impl fmt::Display for RunSubrun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}
