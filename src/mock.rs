//! Mock repository store for deterministic testing.
//!
//! Keeps repositories, branches, protections, labels and labelled issues in
//! memory, records every call in order, and can be told to fail a specific
//! operation.
//!
//! # Example
//!
//! ```
//! use gh_reposettings::mock::{MockRepo, MockStore, OperationKind};
//! use gh_reposettings::store::RepositoryStore;
//!
//! # tokio_test_block_on(async {
//! let store = MockStore::new().with_repo(MockRepo::new("org", "repo", "main").with_label(
//!     "bug",
//!     "d73a4a",
//!     None,
//! ));
//!
//! let repo = store.resolve("org/repo").await.unwrap();
//! let labels = store.list_labels(&repo).await.unwrap();
//! assert_eq!(labels[0].name, "bug");
//! assert_eq!(store.count(OperationKind::ListLabels), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::fields::Fields;
use crate::store::{
    BranchHandle, EntityHandle, LabelWrite, LiveLabel, RepoHandle, RepositoryStore, StoreError,
};

/// Color the mock assigns to labels created without one
pub const MOCK_DEFAULT_COLOR: &str = "ededed";

/// Kind of store call, used for failure injection and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Resolve,
    ReadMetadata,
    WriteMetadata,
    ListBranches,
    ReadProtection,
    WriteProtection,
    ListLabels,
    CreateLabel,
    EditLabel,
    DeleteLabel,
    FindEntities,
    RetagEntity,
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOperation {
    Resolve {
        full_name: String,
    },
    ReadMetadata {
        repo: String,
    },
    WriteMetadata {
        repo: String,
        fields: Fields,
    },
    ListBranches {
        repo: String,
    },
    ReadProtection {
        repo: String,
        branch: String,
    },
    WriteProtection {
        repo: String,
        branch: String,
        settings: Fields,
    },
    ListLabels {
        repo: String,
    },
    CreateLabel {
        repo: String,
        label: LabelWrite,
    },
    EditLabel {
        repo: String,
        current: String,
        update: LabelWrite,
    },
    DeleteLabel {
        repo: String,
        name: String,
    },
    FindEntities {
        repo: String,
        label: String,
    },
    RetagEntity {
        repo: String,
        number: u64,
        label: String,
    },
}

impl MockOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            MockOperation::Resolve { .. } => OperationKind::Resolve,
            MockOperation::ReadMetadata { .. } => OperationKind::ReadMetadata,
            MockOperation::WriteMetadata { .. } => OperationKind::WriteMetadata,
            MockOperation::ListBranches { .. } => OperationKind::ListBranches,
            MockOperation::ReadProtection { .. } => OperationKind::ReadProtection,
            MockOperation::WriteProtection { .. } => OperationKind::WriteProtection,
            MockOperation::ListLabels { .. } => OperationKind::ListLabels,
            MockOperation::CreateLabel { .. } => OperationKind::CreateLabel,
            MockOperation::EditLabel { .. } => OperationKind::EditLabel,
            MockOperation::DeleteLabel { .. } => OperationKind::DeleteLabel,
            MockOperation::FindEntities { .. } => OperationKind::FindEntities,
            MockOperation::RetagEntity { .. } => OperationKind::RetagEntity,
        }
    }

    /// Whether this call changes remote state
    pub fn is_write(&self) -> bool {
        matches!(
            self.kind(),
            OperationKind::WriteMetadata
                | OperationKind::WriteProtection
                | OperationKind::CreateLabel
                | OperationKind::EditLabel
                | OperationKind::DeleteLabel
                | OperationKind::RetagEntity
        )
    }
}

/// Configuration for which operation should fail.
///
/// `target` narrows the failure to one repository, branch, label name or
/// issue number (as a string); `None` fails every call of that kind.
#[derive(Debug, Clone)]
pub struct FailOn {
    pub kind: OperationKind,
    pub target: Option<String>,
    pub error: StoreError,
}

/// An issue or pull request and the names of its labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEntity {
    pub number: u64,
    pub title: String,
    pub labels: Vec<String>,
}

/// In-memory repository
#[derive(Debug, Clone)]
pub struct MockRepo {
    pub handle: RepoHandle,
    pub metadata: Fields,
    pub branches: Vec<BranchHandle>,
    pub protections: HashMap<String, Fields>,
    pub labels: Vec<LiveLabel>,
    pub entities: Vec<MockEntity>,
}

impl MockRepo {
    pub fn new(owner: &str, name: &str, default_branch: &str) -> Self {
        Self {
            handle: RepoHandle {
                owner: owner.to_string(),
                name: name.to_string(),
                default_branch: default_branch.to_string(),
            },
            metadata: Fields::new(),
            branches: Vec::new(),
            protections: HashMap::new(),
            labels: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Fields) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_branch(mut self, name: &str, protected: bool) -> Self {
        self.branches.push(BranchHandle {
            name: name.to_string(),
            protected,
        });
        self
    }

    /// Add a protected branch with the given live protection
    pub fn with_protected_branch(mut self, name: &str, protection: Fields) -> Self {
        self.protections.insert(name.to_string(), protection);
        self.with_branch(name, true)
    }

    pub fn with_label(mut self, name: &str, color: &str, description: Option<&str>) -> Self {
        self.labels.push(LiveLabel {
            name: name.to_string(),
            color: color.to_string(),
            description: description.map(str::to_string),
        });
        self
    }

    pub fn with_entity(mut self, number: u64, title: &str, labels: &[&str]) -> Self {
        self.entities.push(MockEntity {
            number,
            title: title.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
        });
        self
    }
}

/// Internal mutable state.
#[derive(Debug, Default)]
struct MockStoreInner {
    repos: HashMap<String, MockRepo>,
    fail_on: Vec<FailOn>,
    operations: Vec<MockOperation>,
}

/// Mock repository store for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

impl MockStore {
    /// Create a new empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(self, repo: MockRepo) -> Self {
        self.lock().repos.insert(repo.handle.full_name(), repo);
        self
    }

    /// Fail every call of `kind` (optionally only for `target`) with `error`
    pub fn fail_on(self, kind: OperationKind, target: Option<&str>, error: StoreError) -> Self {
        self.lock().fail_on.push(FailOn {
            kind,
            target: target.map(str::to_string),
            error,
        });
        self
    }

    /// All recorded operations, in call order
    pub fn operations(&self) -> Vec<MockOperation> {
        self.lock().operations.clone()
    }

    /// Recorded operations that change remote state
    pub fn writes(&self) -> Vec<MockOperation> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.is_write())
            .cloned()
            .collect()
    }

    /// Number of recorded calls of `kind`
    pub fn count(&self, kind: OperationKind) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.kind() == kind)
            .count()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Snapshot of a repository's current in-memory state
    pub fn repo(&self, full_name: &str) -> Option<MockRepo> {
        self.lock().repos.get(full_name).cloned()
    }

    /// Names of the labels currently carried by issue `number`
    pub fn entity_labels(&self, full_name: &str, number: u64) -> Vec<String> {
        self.repo(full_name)
            .and_then(|repo| repo.entities.into_iter().find(|e| e.number == number))
            .map(|entity| entity.labels)
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MockStoreInner> {
        // A poisoned lock only means another test thread panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `operation`, then return the injected failure for it, if any
    fn record(&self, operation: MockOperation, target: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let kind = operation.kind();
        inner.operations.push(operation);
        let failure = inner.fail_on.iter().find(|f| {
            f.kind == kind && f.target.as_deref().map_or(true, |t| t == target)
        });
        match failure {
            Some(f) => Err(f.error.clone()),
            None => Ok(()),
        }
    }

    fn with_repo_state<T>(
        &self,
        repo: &RepoHandle,
        f: impl FnOnce(&mut MockRepo) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.lock();
        let full_name = repo.full_name();
        let state = inner
            .repos
            .get_mut(&full_name)
            .ok_or(StoreError::NotFound(full_name))?;
        f(state)
    }
}

#[async_trait]
impl RepositoryStore for MockStore {
    async fn resolve(&self, full_name: &str) -> Result<RepoHandle, StoreError> {
        self.record(
            MockOperation::Resolve {
                full_name: full_name.to_string(),
            },
            full_name,
        )?;
        self.lock()
            .repos
            .get(full_name)
            .map(|repo| repo.handle.clone())
            .ok_or_else(|| StoreError::NotFound(full_name.to_string()))
    }

    async fn read_metadata(&self, repo: &RepoHandle) -> Result<Fields, StoreError> {
        let full_name = repo.full_name();
        self.record(
            MockOperation::ReadMetadata {
                repo: full_name.clone(),
            },
            &full_name,
        )?;
        self.with_repo_state(repo, |state| Ok(state.metadata.clone()))
    }

    async fn write_metadata(&self, repo: &RepoHandle, fields: &Fields) -> Result<(), StoreError> {
        let full_name = repo.full_name();
        self.record(
            MockOperation::WriteMetadata {
                repo: full_name.clone(),
                fields: fields.clone(),
            },
            &full_name,
        )?;
        self.with_repo_state(repo, |state| {
            state.metadata.extend(fields.clone());
            Ok(())
        })
    }

    async fn list_branches(&self, repo: &RepoHandle) -> Result<Vec<BranchHandle>, StoreError> {
        let full_name = repo.full_name();
        self.record(
            MockOperation::ListBranches {
                repo: full_name.clone(),
            },
            &full_name,
        )?;
        self.with_repo_state(repo, |state| Ok(state.branches.clone()))
    }

    async fn read_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
    ) -> Result<Fields, StoreError> {
        self.record(
            MockOperation::ReadProtection {
                repo: repo.full_name(),
                branch: branch.name.clone(),
            },
            &branch.name,
        )?;
        self.with_repo_state(repo, |state| {
            state
                .protections
                .get(&branch.name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("protection for {}", branch.name)))
        })
    }

    async fn write_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
        settings: &Fields,
    ) -> Result<(), StoreError> {
        self.record(
            MockOperation::WriteProtection {
                repo: repo.full_name(),
                branch: branch.name.clone(),
                settings: settings.clone(),
            },
            &branch.name,
        )?;
        self.with_repo_state(repo, |state| {
            state
                .protections
                .insert(branch.name.clone(), settings.clone());
            for live in state.branches.iter_mut().filter(|b| b.name == branch.name) {
                live.protected = true;
            }
            Ok(())
        })
    }

    async fn list_labels(&self, repo: &RepoHandle) -> Result<Vec<LiveLabel>, StoreError> {
        let full_name = repo.full_name();
        self.record(
            MockOperation::ListLabels {
                repo: full_name.clone(),
            },
            &full_name,
        )?;
        self.with_repo_state(repo, |state| Ok(state.labels.clone()))
    }

    async fn create_label(&self, repo: &RepoHandle, label: &LabelWrite) -> Result<(), StoreError> {
        self.record(
            MockOperation::CreateLabel {
                repo: repo.full_name(),
                label: label.clone(),
            },
            &label.name,
        )?;
        self.with_repo_state(repo, |state| {
            if state.labels.iter().any(|l| l.name == label.name) {
                return Err(StoreError::Api {
                    status: 422,
                    message: format!("label '{}' already exists", label.name),
                });
            }
            state.labels.push(LiveLabel {
                name: label.name.clone(),
                color: label
                    .color
                    .clone()
                    .unwrap_or_else(|| MOCK_DEFAULT_COLOR.to_string()),
                description: label.description.clone(),
            });
            Ok(())
        })
    }

    async fn edit_label(
        &self,
        repo: &RepoHandle,
        current: &LiveLabel,
        update: &LabelWrite,
    ) -> Result<(), StoreError> {
        self.record(
            MockOperation::EditLabel {
                repo: repo.full_name(),
                current: current.name.clone(),
                update: update.clone(),
            },
            &current.name,
        )?;
        self.with_repo_state(repo, |state| {
            if update.name != current.name && state.labels.iter().any(|l| l.name == update.name) {
                return Err(StoreError::Api {
                    status: 422,
                    message: format!("label '{}' already exists", update.name),
                });
            }
            let label = state
                .labels
                .iter_mut()
                .find(|l| l.name == current.name)
                .ok_or_else(|| StoreError::NotFound(current.name.clone()))?;
            label.name = update.name.clone();
            if let Some(color) = &update.color {
                label.color = color.clone();
            }
            if let Some(description) = &update.description {
                label.description = Some(description.clone());
            }
            for entity in &mut state.entities {
                for name in entity.labels.iter_mut().filter(|n| **n == current.name) {
                    *name = update.name.clone();
                }
            }
            Ok(())
        })
    }

    async fn delete_label(&self, repo: &RepoHandle, label: &LiveLabel) -> Result<(), StoreError> {
        self.record(
            MockOperation::DeleteLabel {
                repo: repo.full_name(),
                name: label.name.clone(),
            },
            &label.name,
        )?;
        self.with_repo_state(repo, |state| {
            let before = state.labels.len();
            state.labels.retain(|l| l.name != label.name);
            if state.labels.len() == before {
                return Err(StoreError::NotFound(label.name.clone()));
            }
            for entity in &mut state.entities {
                entity.labels.retain(|n| *n != label.name);
            }
            Ok(())
        })
    }

    async fn find_entities_by_label(
        &self,
        repo: &RepoHandle,
        label: &LiveLabel,
    ) -> Result<Vec<EntityHandle>, StoreError> {
        self.record(
            MockOperation::FindEntities {
                repo: repo.full_name(),
                label: label.name.clone(),
            },
            &label.name,
        )?;
        self.with_repo_state(repo, |state| {
            Ok(state
                .entities
                .iter()
                .filter(|e| e.labels.contains(&label.name))
                .map(|e| EntityHandle {
                    number: e.number,
                    title: e.title.clone(),
                })
                .collect())
        })
    }

    async fn retag_entity(
        &self,
        repo: &RepoHandle,
        entity: &EntityHandle,
        label_name: &str,
    ) -> Result<(), StoreError> {
        self.record(
            MockOperation::RetagEntity {
                repo: repo.full_name(),
                number: entity.number,
                label: label_name.to_string(),
            },
            &entity.number.to_string(),
        )?;
        self.with_repo_state(repo, |state| {
            if !state.labels.iter().any(|l| l.name == label_name) {
                return Err(StoreError::NotFound(label_name.to_string()));
            }
            let target = state
                .entities
                .iter_mut()
                .find(|e| e.number == entity.number)
                .ok_or_else(|| StoreError::NotFound(format!("#{}", entity.number)))?;
            if !target.labels.iter().any(|n| n == label_name) {
                target.labels.push(label_name.to_string());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;

    fn sample() -> MockStore {
        MockStore::new().with_repo(
            MockRepo::new("org", "repo", "main")
                .with_label("bug", "d73a4a", Some("broken"))
                .with_label("old", "ffffff", None)
                .with_entity(1, "crash", &["bug", "old"])
                .with_entity(2, "typo", &["old"]),
        )
    }

    #[tokio::test]
    async fn test_resolve_unknown_repository() {
        let store = sample();
        let err = store.resolve("org/missing").await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("org/missing".to_string()));
        assert_eq!(store.count(OperationKind::Resolve), 1);
    }

    #[tokio::test]
    async fn test_delete_label_untags_entities() {
        let store = sample();
        let repo = store.resolve("org/repo").await.unwrap();
        let labels = store.list_labels(&repo).await.unwrap();
        store.delete_label(&repo, &labels[1]).await.unwrap();

        assert_eq!(store.entity_labels("org/repo", 1), vec!["bug"]);
        assert!(store.entity_labels("org/repo", 2).is_empty());
    }

    #[tokio::test]
    async fn test_find_and_retag_entities() {
        let store = sample();
        let repo = store.resolve("org/repo").await.unwrap();
        let labels = store.list_labels(&repo).await.unwrap();

        let entities = store.find_entities_by_label(&repo, &labels[1]).await.unwrap();
        assert_eq!(entities.len(), 2);

        store.retag_entity(&repo, &entities[1], "bug").await.unwrap();
        assert_eq!(store.entity_labels("org/repo", 2), vec!["old", "bug"]);
    }

    #[tokio::test]
    async fn test_targeted_failure_injection() {
        let store = sample().fail_on(
            OperationKind::DeleteLabel,
            Some("old"),
            StoreError::Transport("boom".to_string()),
        );
        let repo = store.resolve("org/repo").await.unwrap();
        let labels = store.list_labels(&repo).await.unwrap();

        assert!(store.delete_label(&repo, &labels[1]).await.is_err());
        assert!(store.delete_label(&repo, &labels[0]).await.is_ok());
        assert_eq!(store.count(OperationKind::DeleteLabel), 2);
    }

    #[tokio::test]
    async fn test_write_protection_marks_branch_protected() {
        let store =
            MockStore::new().with_repo(MockRepo::new("org", "repo", "main").with_branch("main", false));
        let repo = store.resolve("org/repo").await.unwrap();
        let branch = store.list_branches(&repo).await.unwrap().remove(0);

        let mut settings = Fields::new();
        settings.insert("enforce_admins".to_string(), FieldValue::Bool(true));
        store.write_protection(&repo, &branch, &settings).await.unwrap();

        let state = store.repo("org/repo").unwrap();
        assert!(state.branches[0].protected);
        assert_eq!(state.protections["main"], settings);
        assert_eq!(store.writes().len(), 1);
    }
}
