//! Cloud identity and ECR provisioning backed by the `aws` CLI

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::{RepoError, Result};
use crate::process::{ProcessRunner, ToolCommand};
use crate::tooling::{
    CloudAccount, CloudIdentity, MANAGED_TAG_KEY, MANAGED_TAG_VALUE, ManagedRepository, RegistryKind,
};

pub const AWS: &str = "aws";

/// Public ECR tokens are only issued in this region
pub const PUBLIC_ECR_REGION: &str = "us-east-1";

const REGION_ENV: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION"];

#[derive(Debug)]
pub struct AwsCli {
    runner: ProcessRunner,
    region_override: Option<String>,
    region: OnceCell<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryList {
    #[serde(default)]
    repositories: Vec<RepositoryEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryEntry {
    repository_name: String,
    repository_arn: String,
    #[serde(default)]
    repository_uri: String,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<ResourceTag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceTag {
    key: String,
    value: String,
}

impl AwsCli {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            region_override: None,
            region: OnceCell::new(),
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region_override = region.filter(|r| !r.trim().is_empty());
        self
    }

    /// Explicit region, then environment, then `aws configure get region`
    pub async fn region(&self) -> Result<String> {
        self.region
            .get_or_try_init(|| async {
                if let Some(region) = &self.region_override {
                    return Ok(region.clone());
                }
                for var in REGION_ENV {
                    if let Ok(region) = std::env::var(var) {
                        if !region.trim().is_empty() {
                            return Ok(region.trim().to_string());
                        }
                    }
                }
                let output = self
                    .runner
                    .output(&ToolCommand::new(AWS).args(["configure", "get", "region"]))
                    .await?;
                let region = output.stdout.trim();
                if output.success() && !region.is_empty() {
                    Ok(region.to_string())
                } else {
                    Err(RepoError::MissingRegion)
                }
            })
            .await
            .cloned()
    }

    async fn ecr(&self, args: &[&str]) -> Result<String> {
        let region = self.region().await?;
        let cmd = ToolCommand::new(AWS)
            .arg("ecr")
            .args(args.iter().copied())
            .args(["--region", region.as_str(), "--output", "json"]);
        self.runner.run(&cmd).await
    }

    async fn is_managed(&self, arn: &str) -> bool {
        match self.ecr(&["list-tags-for-resource", "--resource-arn", arn]).await {
            Ok(stdout) => serde_json::from_str::<TagList>(&stdout)
                .map(|list| {
                    list.tags.iter().any(|t| {
                        t.key == MANAGED_TAG_KEY && t.value.eq_ignore_ascii_case(MANAGED_TAG_VALUE)
                    })
                })
                .unwrap_or(false),
            Err(e) => {
                tracing::warn!(arn = %arn, error = %e, "cannot list repository tags");
                false
            }
        }
    }
}

#[async_trait]
impl CloudIdentity for AwsCli {
    async fn current_account(&self) -> Result<CloudAccount> {
        let stdout = self
            .runner
            .run(&ToolCommand::new(AWS).args(["sts", "get-caller-identity", "--output", "json"]))
            .await
            .map_err(|e| RepoError::Identity {
                message: e.to_string(),
            })?;
        let identity: CallerIdentity = serde_json::from_str(&stdout)?;
        let region = self.region().await?;
        Ok(CloudAccount {
            account: identity.account,
            region,
        })
    }

    async fn registry_token(&self, kind: RegistryKind) -> Result<String> {
        let cmd = match kind {
            RegistryKind::Public => ToolCommand::new(AWS).args([
                "ecr-public",
                "get-login-password",
                "--region",
                PUBLIC_ECR_REGION,
            ]),
            RegistryKind::Private => {
                let region = self.region().await?;
                ToolCommand::new(AWS).args(["ecr", "get-login-password", "--region", region.as_str()])
            }
        };
        let token = self.runner.run(&cmd).await?;
        Ok(token.trim().to_string())
    }

    async fn ensure_repository(&self, name: &str) -> Result<bool> {
        match self.ecr(&["describe-repositories", "--repository-names", name]).await {
            Ok(_) => return Ok(false),
            Err(RepoError::CommandFailed { stderr, .. }) if stderr.contains("RepositoryNotFoundException") => {}
            Err(e) => return Err(e),
        }

        let tag = format!("Key={},Value={}", MANAGED_TAG_KEY, MANAGED_TAG_VALUE);
        tracing::info!(repository = %name, "creating repository");
        self.ecr(&["create-repository", "--repository-name", name, "--tags", tag.as_str()])
            .await?;
        Ok(true)
    }

    async fn list_repositories(&self, managed_only: bool) -> Result<Vec<ManagedRepository>> {
        let stdout = self.ecr(&["describe-repositories"]).await?;
        let list: RepositoryList = serde_json::from_str(&stdout)?;

        let mut out = Vec::new();
        for repo in list.repositories {
            if managed_only && !self.is_managed(&repo.repository_arn).await {
                continue;
            }
            out.push(ManagedRepository {
                name: repo.repository_name,
                arn: repo.repository_arn,
                uri: repo.repository_uri,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_repository(&self, name: &str) -> Result<()> {
        self.ecr(&["delete-repository", "--repository-name", name, "--force"])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_region_wins() {
        let aws = AwsCli::new(ProcessRunner::default()).with_region(Some("eu-central-1".into()));
        assert_eq!(aws.region().await.unwrap(), "eu-central-1");
    }

    #[test]
    fn test_parse_repository_list() {
        let raw = r#"{"repositories": [
            {"repositoryName": "demo", "repositoryArn": "arn:aws:ecr:eu-west-1:1:repository/demo",
             "repositoryUri": "1.dkr.ecr.eu-west-1.amazonaws.com/demo", "imageTagMutability": "MUTABLE"}
        ]}"#;
        let list: RepositoryList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.repositories[0].repository_name, "demo");

        let tags: TagList = serde_json::from_str(r#"{"tags": [{"Key": "chart-syncer", "Value": "true"}]}"#).unwrap();
        assert_eq!(tags.tags[0].key, MANAGED_TAG_KEY);

        let id: CallerIdentity =
            serde_json::from_str(r#"{"UserId": "X", "Account": "123456789012", "Arn": "arn"}"#).unwrap();
        assert_eq!(id.account, "123456789012");
    }
}
