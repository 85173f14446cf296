//! Repository Store
//!
//! The boundary between the reconcilers and whatever hosts the repositories.
//!
//! # Design
//!
//! `RepositoryStore` is async because every implementation but the mock does
//! network I/O. Reconcilers await each call in turn; nothing is issued
//! concurrently. Handles returned by the store are point-in-time snapshots and
//! are never cached across reconciler invocations.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::fields::{FieldSource, FieldValue, Fields};

/// Errors raised by a repository store on a failed read or write
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The requested repository, branch or label does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The credential was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("rate limited")]
    RateLimited,

    /// The remote API rejected the request.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Network or client level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Resolved repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

impl RepoHandle {
    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Branch as returned by the branch listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHandle {
    pub name: String,
    pub protected: bool,
}

impl BranchHandle {
    /// Whether this branch is the repository's default branch
    pub fn is_default_of(&self, repo: &RepoHandle) -> bool {
        self.name == repo.default_branch
    }
}

/// Label as returned by the label listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLabel {
    pub name: String,

    /// 6-digit lowercase hexadecimal, without #
    pub color: String,

    pub description: Option<String>,
}

impl FieldSource for LiveLabel {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::Str(self.name.clone())),
            "color" => Some(FieldValue::Str(self.color.clone())),
            "description" => Some(FieldValue::Str(
                self.description.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

/// Issue or pull request that can carry labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHandle {
    pub number: u64,
    pub title: String,
}

/// Label write request
///
/// `None` leaves the field to the remote: on create the remote default
/// applies, on edit the current value is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelWrite {
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

/// Read/write access to hosted repository state
///
/// # Error Handling
///
/// Every method returns `StoreError` on failure; the caller decides whether
/// the failure is fatal (metadata, branch protection) or contained (labels).
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Look up a repository by its normalised `owner/name` identifier
    async fn resolve(&self, full_name: &str) -> Result<RepoHandle, StoreError>;

    async fn read_metadata(&self, repo: &RepoHandle) -> Result<Fields, StoreError>;

    async fn write_metadata(&self, repo: &RepoHandle, fields: &Fields) -> Result<(), StoreError>;

    async fn list_branches(&self, repo: &RepoHandle) -> Result<Vec<BranchHandle>, StoreError>;

    /// Current protection of a protected branch, flattened to canonical field names
    async fn read_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
    ) -> Result<Fields, StoreError>;

    async fn write_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
        settings: &Fields,
    ) -> Result<(), StoreError>;

    async fn list_labels(&self, repo: &RepoHandle) -> Result<Vec<LiveLabel>, StoreError>;

    async fn create_label(&self, repo: &RepoHandle, label: &LabelWrite) -> Result<(), StoreError>;

    async fn edit_label(
        &self,
        repo: &RepoHandle,
        current: &LiveLabel,
        update: &LabelWrite,
    ) -> Result<(), StoreError>;

    async fn delete_label(&self, repo: &RepoHandle, label: &LiveLabel) -> Result<(), StoreError>;

    /// Every issue and pull request, open or closed, tagged with `label`
    async fn find_entities_by_label(
        &self,
        repo: &RepoHandle,
        label: &LiveLabel,
    ) -> Result<Vec<EntityHandle>, StoreError>;

    /// Add the existing label `label_name` to `entity`
    async fn retag_entity(
        &self,
        repo: &RepoHandle,
        entity: &EntityHandle,
        label_name: &str,
    ) -> Result<(), StoreError>;
}

/// Store wrapper that reads from the inner store and only logs writes
pub struct DryRunStore<S> {
    inner: S,
}

impl<S: RepositoryStore> DryRunStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn describe_fields(fields: &Fields) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl<S: RepositoryStore> RepositoryStore for DryRunStore<S> {
    async fn resolve(&self, full_name: &str) -> Result<RepoHandle, StoreError> {
        self.inner.resolve(full_name).await
    }

    async fn read_metadata(&self, repo: &RepoHandle) -> Result<Fields, StoreError> {
        self.inner.read_metadata(repo).await
    }

    async fn write_metadata(&self, repo: &RepoHandle, fields: &Fields) -> Result<(), StoreError> {
        info!(
            "[dry-run] would update {}: {}",
            repo.full_name(),
            describe_fields(fields)
        );
        Ok(())
    }

    async fn list_branches(&self, repo: &RepoHandle) -> Result<Vec<BranchHandle>, StoreError> {
        self.inner.list_branches(repo).await
    }

    async fn read_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
    ) -> Result<Fields, StoreError> {
        self.inner.read_protection(repo, branch).await
    }

    async fn write_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
        settings: &Fields,
    ) -> Result<(), StoreError> {
        info!(
            "[dry-run] would protect {}@{}: {}",
            repo.full_name(),
            branch.name,
            describe_fields(settings)
        );
        Ok(())
    }

    async fn list_labels(&self, repo: &RepoHandle) -> Result<Vec<LiveLabel>, StoreError> {
        self.inner.list_labels(repo).await
    }

    async fn create_label(&self, repo: &RepoHandle, label: &LabelWrite) -> Result<(), StoreError> {
        info!(
            "[dry-run] would create label '{}' in {}",
            label.name,
            repo.full_name()
        );
        Ok(())
    }

    async fn edit_label(
        &self,
        repo: &RepoHandle,
        current: &LiveLabel,
        update: &LabelWrite,
    ) -> Result<(), StoreError> {
        info!(
            "[dry-run] would edit label '{}' -> '{}' in {}",
            current.name,
            update.name,
            repo.full_name()
        );
        Ok(())
    }

    async fn delete_label(&self, repo: &RepoHandle, label: &LiveLabel) -> Result<(), StoreError> {
        info!(
            "[dry-run] would delete label '{}' from {}",
            label.name,
            repo.full_name()
        );
        Ok(())
    }

    async fn find_entities_by_label(
        &self,
        repo: &RepoHandle,
        label: &LiveLabel,
    ) -> Result<Vec<EntityHandle>, StoreError> {
        self.inner.find_entities_by_label(repo, label).await
    }

    async fn retag_entity(
        &self,
        repo: &RepoHandle,
        entity: &EntityHandle,
        label_name: &str,
    ) -> Result<(), StoreError> {
        info!(
            "[dry-run] would add label '{}' to #{} in {}",
            label_name,
            entity.number,
            repo.full_name()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoSettingsConfig;
    use crate::mock::{MockRepo, MockStore, OperationKind};
    use crate::settings::RepoSettings;

    #[test]
    fn test_default_branch_check() {
        let repo = RepoHandle {
            owner: "org".to_string(),
            name: "repo".to_string(),
            default_branch: "main".to_string(),
        };
        let main = BranchHandle {
            name: "main".to_string(),
            protected: false,
        };
        let dev = BranchHandle {
            name: "dev".to_string(),
            protected: true,
        };

        assert_eq!(repo.full_name(), "org/repo");
        assert!(main.is_default_of(&repo));
        assert!(!dev.is_default_of(&repo));
    }

    #[tokio::test]
    async fn test_dry_run_reads_through_and_skips_writes() {
        let mock = MockStore::new().with_repo(
            MockRepo::new("org", "repo", "main")
                .with_branch("main", false)
                .with_label("old", "ffffff", None)
                .with_entity(1, "Crash", &["old"]),
        );
        let store = DryRunStore::new(mock.clone());
        let config = RepoSettingsConfig::from_document(
            &serde_yaml::from_str(
                r#"
repos:
  org/repo:
    features: {wiki: false}
    protect-default-branch: true
    branch-protection: {enforce-admins: true}
    labels:
      bug: {color: d73a4a}
"#,
            )
            .unwrap(),
        )
        .unwrap();

        let report = RepoSettings::with_default_reconcilers(&store)
            .apply(&config)
            .await
            .unwrap();

        assert!(mock.writes().is_empty());
        assert_eq!(mock.count(OperationKind::ListLabels), 1);
        assert_eq!(mock.count(OperationKind::ListBranches), 1);
        assert_eq!(mock.entity_labels("org/repo", 1), vec!["old"]);

        // Planned operations are still reported as if they succeeded
        let labels = report.repositories[0].labels().unwrap();
        assert_eq!(labels.created(), 1);
        assert_eq!(labels.deleted(), 1);
    }
}
