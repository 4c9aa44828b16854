//! Source inspection and platform resolution

use chartsync_core::{ImageReference, PlatformPolicy};
use chartsync_repo::RegistryTooling;

use crate::error::{Result, SyncError};

/// Decides what gets copied for each extracted image
pub struct PlatformResolver<'a> {
    registry: &'a dyn RegistryTooling,
    policy: &'a PlatformPolicy,
}

impl<'a> PlatformResolver<'a> {
    pub fn new(registry: &'a dyn RegistryTooling, policy: &'a PlatformPolicy) -> Self {
        Self { registry, policy }
    }

    /// Check the source resolves, then pick the reference to copy.
    ///
    /// Under `auto` that is the source itself (index or single manifest).
    /// Under an explicit platform it is the matching child, by digest.
    pub async fn resolve(&self, image: &ImageReference) -> Result<ImageReference> {
        let reachable = self.registry.exists(image).await.map_err(|e| SyncError::ImageResolution {
            image: image.to_string(),
            message: format!("cannot inspect source: {}", e),
        })?;
        if !reachable {
            return Err(SyncError::ImageResolution {
                image: image.to_string(),
                message: "not found at source".to_string(),
            });
        }

        match self.policy {
            PlatformPolicy::Auto => Ok(image.clone()),
            PlatformPolicy::Explicit(platform) => {
                let digest = self
                    .registry
                    .child_manifest_digest(image, platform)
                    .await
                    .map_err(|e| SyncError::ImageResolution {
                        image: image.to_string(),
                        message: e.to_string(),
                    })?;
                tracing::debug!(image = %image, platform = %platform, digest = %digest, "selected platform child");
                Ok(image.with_digest(digest))
            }
        }
    }
}
