//! Registry logins
//!
//! The target registry is logged into once per run before anything is
//! written. Source registries that need credentials (`public.ecr.aws`,
//! Docker Hub) are logged into lazily, the first time an addon touches
//! them. A failed login never fails an addon; it is reported as a warning
//! and the call that needed it fails on its own if the registry insists.

use std::collections::BTreeSet;

use chartsync_core::image::DOCKER_HUB;
use chartsync_repo::{CredentialSet, RegistryCredentials, RegistryKind, is_ecr_host};

use crate::tools::Tools;

pub const PUBLIC_ECR_HOST: &str = "public.ecr.aws";

#[derive(Debug, Default)]
pub struct Authenticator {
    credentials: CredentialSet,
    attempted: BTreeSet<String>,
}

impl Authenticator {
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            credentials,
            attempted: BTreeSet::new(),
        }
    }

    /// Whether a login to `host` has already been tried this run
    pub fn is_attempted(&self, host: &str) -> bool {
        self.attempted.contains(&normalize_host(host))
    }

    /// Log both tool sets into `host` unless already tried. Returns warnings.
    pub async fn ensure(&mut self, tools: &Tools, host: &str) -> Vec<String> {
        let host = normalize_host(host);
        if !self.attempted.insert(host.clone()) {
            return Vec::new();
        }

        let credentials = match self.credentials_for(tools, &host).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::debug!(registry = %host, "no credentials, continuing anonymously");
                return Vec::new();
            }
            Err(message) => {
                let warning = format!("cannot obtain credentials for {}: {}", host, message);
                tracing::warn!("{}", warning);
                return vec![warning];
            }
        };

        let mut warnings = Vec::new();
        if let Err(e) = tools.registry.login(&host, &credentials).await {
            warnings.push(format!("image registry login to {} failed: {}", host, e));
        }
        if let Err(e) = tools.charts.login(&host, &credentials).await {
            warnings.push(format!("chart registry login to {} failed: {}", host, e));
        }
        if warnings.is_empty() {
            tracing::info!(registry = %host, "logged in");
        }
        for w in &warnings {
            tracing::warn!("{}", w);
        }
        warnings
    }

    async fn credentials_for(&self, tools: &Tools, host: &str) -> Result<Option<RegistryCredentials>, String> {
        if host == PUBLIC_ECR_HOST {
            if let Some(password) = &self.credentials.public_ecr_password {
                return Ok(Some(RegistryCredentials::ecr(password.clone())));
            }
            return self.cloud_token(tools, RegistryKind::Public).await;
        }
        if is_ecr_host(host) {
            if let Some(password) = &self.credentials.private_ecr_password {
                return Ok(Some(RegistryCredentials::ecr(password.clone())));
            }
            return self.cloud_token(tools, RegistryKind::Private).await;
        }
        if host == DOCKER_HUB {
            return Ok(self.credentials.dockerhub.clone());
        }
        Ok(None)
    }

    async fn cloud_token(&self, tools: &Tools, kind: RegistryKind) -> Result<Option<RegistryCredentials>, String> {
        match &tools.identity {
            Some(identity) => identity
                .registry_token(kind)
                .await
                .map(|token| Some(RegistryCredentials::ecr(token)))
                .map_err(|e| e.to_string()),
            None => Ok(None),
        }
    }
}

fn normalize_host(host: &str) -> String {
    let host = host
        .trim()
        .trim_start_matches("oci://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match host.as_str() {
        "" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB.to_string(),
        _ => host,
    }
}
