//! Registry credentials
//!
//! Passwords never appear in `Debug` output or on a command line; tooling
//! receives them on stdin.

use std::fmt;

/// Environment variable holding a public ECR password override
pub const PUBLIC_ECR_PASSWORD_ENV: &str = "PUBLIC_ECR_PASSWORD";
/// Environment variable holding a private (target) registry password override
pub const PRIVATE_ECR_PASSWORD_ENV: &str = "PRIVATE_ECR_PASSWORD";
pub const DOCKERHUB_USERNAME_ENV: &str = "DOCKERHUB_USERNAME";
pub const DOCKERHUB_TOKEN_ENV: &str = "DOCKERHUB_TOKEN";

/// Username used with ECR authorization tokens
pub const ECR_USERNAME: &str = "AWS";

/// Username/password pair for a registry login
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    username: String,
    password: String,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// ECR login: fixed username, token as password
    pub fn ecr(token: impl Into<String>) -> Self {
        Self::new(ECR_USERNAME, token)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Explicit secrets supplied by flags or environment
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    /// Overrides the cloud token for `public.ecr.aws`
    pub public_ecr_password: Option<String>,
    /// Overrides the cloud token for the target registry
    pub private_ecr_password: Option<String>,
    pub dockerhub: Option<RegistryCredentials>,
}

impl CredentialSet {
    /// Read the well-known environment variables; empty values count as unset
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let dockerhub = match (var(DOCKERHUB_USERNAME_ENV), var(DOCKERHUB_TOKEN_ENV)) {
            (Some(user), Some(token)) => Some(RegistryCredentials::new(user, token)),
            _ => None,
        };

        Self {
            public_ecr_password: var(PUBLIC_ECR_PASSWORD_ENV),
            private_ecr_password: var(PRIVATE_ECR_PASSWORD_ENV),
            dockerhub,
        }
    }

    /// Fill unset fields from `other`
    pub fn or(self, other: CredentialSet) -> Self {
        Self {
            public_ecr_password: self.public_ecr_password.or(other.public_ecr_password),
            private_ecr_password: self.private_ecr_password.or(other.private_ecr_password),
            dockerhub: self.dockerhub.or(other.dockerhub),
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialSet")
            .field("public_ecr_password", &redact(&self.public_ecr_password))
            .field("private_ecr_password", &redact(&self.private_ecr_password))
            .field("dockerhub", &self.dockerhub)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let creds = RegistryCredentials::ecr("super-secret-token");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("AWS"));
        assert!(!debug.contains("super-secret-token"));

        let set = CredentialSet {
            private_ecr_password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", set).contains("hunter2"));
    }

    #[test]
    fn test_or_prefers_explicit() {
        let explicit = CredentialSet {
            public_ecr_password: Some("flag".into()),
            ..Default::default()
        };
        let env = CredentialSet {
            public_ecr_password: Some("env".into()),
            private_ecr_password: Some("env-private".into()),
            dockerhub: None,
        };
        let merged = explicit.or(env);
        assert_eq!(merged.public_ecr_password.as_deref(), Some("flag"));
        assert_eq!(merged.private_ecr_password.as_deref(), Some("env-private"));
    }
}
