//! Preflight decisions: should a destination be written?
//!
//! The decision is split into two pure steps so callers only fetch digests
//! when the policy actually needs them:
//!
//! 1. [`PreflightPolicy::on_presence`] decides from tag presence alone, or
//!    asks for a digest comparison.
//! 2. [`PreflightPolicy::on_digests`] finishes the decision once both
//!    digests are known.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Run-wide flags controlling how existing destinations are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreflightPolicy {
    pub skip_existing: bool,
    pub verify_existing_digest: bool,
    pub overwrite_existing: bool,
}

impl Default for PreflightPolicy {
    fn default() -> Self {
        Self {
            skip_existing: true,
            verify_existing_digest: false,
            overwrite_existing: false,
        }
    }
}

/// What the registry reported for a destination tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationState {
    Absent,
    Present,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreflightDecision {
    /// Destination missing, or policy pushes unconditionally
    Push,
    /// Destination present; presence is enough
    SkipExists,
    /// Destination present with the same digest as the source
    SkipDigestMatch,
    /// Destination present with a different digest and overwriting is not
    /// allowed; nothing is written
    SkipMismatch { source: String, destination: String },
    /// Destination present with a different digest; delete then push
    Overwrite,
}

/// Result of the presence step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    Decided(PreflightDecision),
    CompareDigests,
}

impl PreflightPolicy {
    pub fn on_presence(&self, state: DestinationState) -> PresenceOutcome {
        match state {
            DestinationState::Absent => PresenceOutcome::Decided(PreflightDecision::Push),
            DestinationState::Present if !self.skip_existing => {
                PresenceOutcome::Decided(PreflightDecision::Push)
            }
            DestinationState::Present if self.verify_existing_digest => PresenceOutcome::CompareDigests,
            DestinationState::Present => PresenceOutcome::Decided(PreflightDecision::SkipExists),
        }
    }

    pub fn on_digests(&self, source: &str, destination: &str) -> PreflightDecision {
        if source == destination {
            PreflightDecision::SkipDigestMatch
        } else if self.overwrite_existing {
            PreflightDecision::Overwrite
        } else {
            PreflightDecision::SkipMismatch {
                source: source.to_string(),
                destination: destination.to_string(),
            }
        }
    }
}

impl PreflightDecision {
    /// Whether a copy or push follows
    pub fn writes(&self) -> bool {
        matches!(self, PreflightDecision::Push | PreflightDecision::Overwrite)
    }

    pub fn is_skip(&self) -> bool {
        !self.writes()
    }
}

impl fmt::Display for PreflightDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightDecision::Push => write!(f, "push"),
            PreflightDecision::SkipExists => write!(f, "skip (exists)"),
            PreflightDecision::SkipDigestMatch => write!(f, "skip (digest match)"),
            PreflightDecision::SkipMismatch { .. } => write!(f, "skip (digest mismatch)"),
            PreflightDecision::Overwrite => write!(f, "overwrite"),
        }
    }
}
