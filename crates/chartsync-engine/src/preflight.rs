//! Preflight against the live registry
//!
//! Drives [`PreflightPolicy`] with real registry answers. Digests are only
//! fetched when the policy asks for a comparison.

use chartsync_core::{DestinationState, ImageReference, PreflightDecision, PreflightPolicy, PresenceOutcome};
use chartsync_repo::RegistryTooling;

/// A decision and the warning that came with it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub decision: PreflightDecision,
    pub warning: Option<String>,
}

impl Preflight {
    fn decided(decision: PreflightDecision) -> Self {
        Self {
            decision,
            warning: None,
        }
    }

    /// Inspection failed: assume absent and push
    fn assume_absent(destination: &ImageReference, error: impl std::fmt::Display) -> Self {
        let warning = format!("preflight for {} failed ({}); pushing anyway", destination, error);
        tracing::warn!("{}", warning);
        Self {
            decision: PreflightDecision::Push,
            warning: Some(warning),
        }
    }
}

pub struct PreflightEngine<'a> {
    registry: &'a dyn RegistryTooling,
    policy: PreflightPolicy,
}

impl<'a> PreflightEngine<'a> {
    pub fn new(registry: &'a dyn RegistryTooling, policy: PreflightPolicy) -> Self {
        Self { registry, policy }
    }

    /// Decide for one image. `source` is what would be copied: the
    /// platform-specific child digest under an explicit platform.
    pub async fn image(&self, source: &ImageReference, destination: &ImageReference) -> Preflight {
        let state = match self.registry.exists(destination).await {
            Ok(true) => DestinationState::Present,
            Ok(false) => DestinationState::Absent,
            Err(e) => return Preflight::assume_absent(destination, e),
        };

        match self.policy.on_presence(state) {
            PresenceOutcome::Decided(decision) => Preflight::decided(decision),
            PresenceOutcome::CompareDigests => self.compare(source, destination).await,
        }
    }

    /// Charts are repacked, so their digests never match the source.
    /// Presence is all that is checked.
    pub async fn chart(&self, destination: &ImageReference) -> Preflight {
        let presence_only = PreflightPolicy {
            verify_existing_digest: false,
            ..self.policy
        };
        let state = match self.registry.exists(destination).await {
            Ok(true) => DestinationState::Present,
            Ok(false) => DestinationState::Absent,
            Err(e) => return Preflight::assume_absent(destination, e),
        };
        match presence_only.on_presence(state) {
            PresenceOutcome::Decided(decision) => Preflight::decided(decision),
            PresenceOutcome::CompareDigests => Preflight::decided(PreflightDecision::SkipExists),
        }
    }

    async fn compare(&self, source: &ImageReference, destination: &ImageReference) -> Preflight {
        let source_digest = match &source.digest {
            Some(d) => d.clone(),
            None => match self.registry.manifest_digest(source).await {
                Ok(d) => d,
                Err(e) => return Preflight::assume_absent(destination, e),
            },
        };
        let destination_digest = match self.registry.manifest_digest(destination).await {
            Ok(d) => d,
            Err(e) => return Preflight::assume_absent(destination, e),
        };

        let decision = self.policy.on_digests(&source_digest, &destination_digest);
        let warning = match &decision {
            PreflightDecision::SkipMismatch { source, destination: dest } => {
                let warning = format!(
                    "{} exists with digest {} but source has {}; left untouched",
                    destination, dest, source
                );
                tracing::warn!("{}", warning);
                Some(warning)
            }
            _ => None,
        };
        Preflight { decision, warning }
    }
}
