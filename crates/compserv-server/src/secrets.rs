//! Where the database connection string comes from when it is not written
//! into the configuration file.
//!
//! ```yaml
//! database:
//!   secret:
//!     provider: kubernetes
//!     path: /var/run/secrets/compserv/database-url
//! ```

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
  #[error("cannot read secret file {path:?}: {source}")]
  Read {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("secret {0} is empty")]
  Empty(String),

  #[error("secret {0} is not valid UTF-8")]
  NotUtf8(String),

  #[error("AWS Secrets Manager: {0}")]
  Aws(String),

  #[error("the AWS secret provider requires building with the `aws` feature")]
  AwsDisabled,
}

/// A source for the database connection string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SecretProvider {
  Aws(AwsProvider),
  Kubernetes(KubernetesProvider),
}

/// A Secrets Manager secret, fetched by ARN (or name).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AwsProvider {
  pub secret_arn:    String,
  /// Falls back to the SDK's region resolution when unset.
  pub secret_region: Option<String>,
}

/// A secret mounted into the pod as a file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KubernetesProvider {
  pub path: PathBuf,
}

impl SecretProvider {
  pub async fn resolve_secret(&self) -> Result<String, SecretError> {
    match self {
      SecretProvider::Aws(aws) => aws.resolve_secret().await,
      SecretProvider::Kubernetes(k8s) => k8s.resolve_secret().await,
    }
  }
}

impl KubernetesProvider {
  pub async fn resolve_secret(&self) -> Result<String, SecretError> {
    let raw = tokio::fs::read_to_string(&self.path)
      .await
      .map_err(|source| SecretError::Read { path: self.path.clone(), source })?;
    // Mounted files usually end in a newline.
    let secret = raw.trim();
    if secret.is_empty() {
      return Err(SecretError::Empty(self.path.display().to_string()));
    }
    Ok(secret.to_owned())
  }
}

impl AwsProvider {
  #[cfg(feature = "aws")]
  pub async fn resolve_secret(&self) -> Result<String, SecretError> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &self.secret_region {
      loader = loader.region(aws_config::Region::new(region.clone()));
    }
    let client = aws_sdk_secretsmanager::Client::new(&loader.load().await);

    let output = client
      .get_secret_value()
      .secret_id(&self.secret_arn)
      .version_stage("AWSCURRENT")
      .send()
      .await
      .map_err(|e| SecretError::Aws(e.to_string()))?;

    let secret = match (output.secret_string(), output.secret_binary()) {
      (Some(s), _) => s.to_owned(),
      (None, Some(blob)) => String::from_utf8(blob.clone().into_inner())
        .map_err(|_| SecretError::NotUtf8(self.secret_arn.clone()))?,
      (None, None) => String::new(),
    };
    if secret.is_empty() {
      return Err(SecretError::Empty(self.secret_arn.clone()));
    }
    Ok(secret)
  }

  #[cfg(not(feature = "aws"))]
  pub async fn resolve_secret(&self) -> Result<String, SecretError> {
    Err(SecretError::AwsDisabled)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn kubernetes_secret_is_trimmed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database-url");
    std::fs::write(&path, "/data/compliance.db\n").unwrap();

    let provider = SecretProvider::Kubernetes(KubernetesProvider { path });
    assert_eq!(provider.resolve_secret().await.unwrap(), "/data/compliance.db");
  }

  #[tokio::test]
  async fn kubernetes_secret_must_exist_and_be_non_empty() {
    let dir = tempfile::tempdir().unwrap();

    let missing = KubernetesProvider { path: dir.path().join("absent") };
    assert!(matches!(missing.resolve_secret().await, Err(SecretError::Read { .. })));

    let path = dir.path().join("blank");
    std::fs::write(&path, " \n").unwrap();
    let blank = KubernetesProvider { path };
    assert!(matches!(blank.resolve_secret().await, Err(SecretError::Empty(_))));
  }

  #[cfg(not(feature = "aws"))]
  #[tokio::test]
  async fn aws_requires_feature() {
    let provider = SecretProvider::Aws(AwsProvider {
      secret_arn:    "arn:aws:secretsmanager:us-east-1:123456789012:secret:db".into(),
      secret_region: Some("us-east-1".into()),
    });
    assert!(matches!(provider.resolve_secret().await, Err(SecretError::AwsDisabled)));
  }

  #[test]
  fn provider_is_selected_by_tag() {
    let provider: SecretProvider = serde_json::from_str(
      r#"{"provider": "aws", "secret_arn": "arn:db", "secret_region": "eu-west-1"}"#,
    )
    .unwrap();
    assert_eq!(
      provider,
      SecretProvider::Aws(AwsProvider {
        secret_arn:    "arn:db".into(),
        secret_region: Some("eu-west-1".into()),
      })
    );

    let provider: SecretProvider =
      serde_json::from_str(r#"{"provider": "kubernetes", "path": "/run/secret"}"#).unwrap();
    assert_eq!(
      provider,
      SecretProvider::Kubernetes(KubernetesProvider { path: "/run/secret".into() })
    );
  }
}
