//! Repository Settings Orchestration
//!
//! Runs the registered reconcilers over every configured repository

use async_trait::async_trait;
use tracing::info;

use crate::config::{RepoConfig, RepoSettingsConfig};
use crate::error::Result;
use crate::labels::{LabelReconciler, LabelReport};
use crate::metadata::{MetadataOutcome, MetadataReconciler};
use crate::protection::{BranchProtectionReconciler, ProtectionReport};
use crate::store::{RepoHandle, RepositoryStore};

/// Result of a single reconciler for one repository
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Metadata(MetadataOutcome),
    BranchProtection(ProtectionReport),
    Labels(LabelReport),
}

/// Computes and applies the delta for one configuration aspect
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reconcile(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<ReconcileOutcome>;
}

#[async_trait]
impl Reconciler for MetadataReconciler {
    fn name(&self) -> &'static str {
        "Repo settings"
    }

    async fn reconcile(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<ReconcileOutcome> {
        Ok(ReconcileOutcome::Metadata(
            self.apply(store, repo, config).await?,
        ))
    }
}

#[async_trait]
impl Reconciler for BranchProtectionReconciler {
    fn name(&self) -> &'static str {
        "Branch protection"
    }

    async fn reconcile(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<ReconcileOutcome> {
        Ok(ReconcileOutcome::BranchProtection(
            self.apply(store, repo, config).await?,
        ))
    }
}

#[async_trait]
impl Reconciler for LabelReconciler {
    fn name(&self) -> &'static str {
        "Labels"
    }

    async fn reconcile(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<ReconcileOutcome> {
        Ok(ReconcileOutcome::Labels(
            self.apply(store, repo, config).await?,
        ))
    }
}

/// Outcomes of every reconciler for one repository, in execution order
#[derive(Debug, Clone, PartialEq)]
pub struct RepoReport {
    pub repository: String,
    pub outcomes: Vec<(&'static str, ReconcileOutcome)>,
}

impl RepoReport {
    /// Label report of this repository, if labels were reconciled
    pub fn labels(&self) -> Option<&LabelReport> {
        self.outcomes.iter().find_map(|(_, outcome)| match outcome {
            ReconcileOutcome::Labels(report) => Some(report),
            _ => None,
        })
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub repositories: Vec<RepoReport>,
}

impl RunReport {
    /// Number of label operations that failed across all repositories
    pub fn label_failures(&self) -> usize {
        self.repositories
            .iter()
            .filter_map(RepoReport::labels)
            .map(|labels| labels.failures().len())
            .sum()
    }
}

/// Reconciliation runner
///
/// Reconcilers run in registration order; repositories in document order.
pub struct RepoSettings<'s> {
    store: &'s dyn RepositoryStore,
    reconcilers: Vec<Box<dyn Reconciler>>,
}

impl<'s> RepoSettings<'s> {
    /// Runner without any reconciler
    pub fn new(store: &'s dyn RepositoryStore) -> Self {
        Self {
            store,
            reconcilers: Vec::new(),
        }
    }

    /// Runner with metadata, branch protection and label reconcilers, in that order
    pub fn with_default_reconcilers(store: &'s dyn RepositoryStore) -> Self {
        let mut settings = Self::new(store);
        settings.use_reconciler(MetadataReconciler);
        settings.use_reconciler(BranchProtectionReconciler);
        settings.use_reconciler(LabelReconciler::new());
        settings
    }

    pub fn use_reconciler<R: Reconciler + 'static>(&mut self, reconciler: R) {
        self.reconcilers.push(Box::new(reconciler));
    }

    /// Apply the configuration to every repository
    ///
    /// # Errors
    /// The first error returned by the store or a reconciler aborts the run;
    /// repositories already processed keep their changes.
    pub async fn apply(&self, config: &RepoSettingsConfig) -> Result<RunReport> {
        let mut report = RunReport::default();

        for (full_name, repo_config) in &config.repos {
            let repo = self.store.resolve(full_name).await?;
            info!("Processing repo '{}'...", repo.full_name());

            let mut repo_report = RepoReport {
                repository: repo.full_name(),
                outcomes: Vec::new(),
            };
            for reconciler in &self.reconcilers {
                info!("Using reconciler '{}'", reconciler.name());
                let outcome = reconciler.reconcile(self.store, &repo, repo_config).await?;
                repo_report.outcomes.push((reconciler.name(), outcome));
            }
            report.repositories.push(repo_report);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::{MockOperation, MockRepo, MockStore, OperationKind};
    use crate::store::StoreError;
    use std::sync::{Arc, Mutex};

    fn config(yaml: &str) -> RepoSettingsConfig {
        RepoSettingsConfig::from_document(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    /// Records which repositories it was called for
    struct Recording(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Reconciler for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn reconcile(
            &self,
            _store: &dyn RepositoryStore,
            repo: &RepoHandle,
            _config: &RepoConfig,
        ) -> Result<ReconcileOutcome> {
            self.0.lock().unwrap().push(repo.full_name());
            Ok(ReconcileOutcome::Metadata(MetadataOutcome::NotManaged))
        }
    }

    #[tokio::test]
    async fn test_resolves_normalized_identifiers() {
        let store = MockStore::new().with_repo(MockRepo::new("org", "test", "main"));
        let settings = RepoSettings::new(&store);

        let report = settings
            .apply(&config("repos:\n  https://github.com/org/test: {}\n"))
            .await
            .unwrap();

        assert_eq!(
            store.operations(),
            vec![MockOperation::Resolve {
                full_name: "org/test".to_string()
            }]
        );
        assert_eq!(report.repositories[0].repository, "org/test");
    }

    #[tokio::test]
    async fn test_runs_each_reconciler_once_per_repository_in_order() {
        let store = MockStore::new()
            .with_repo(MockRepo::new("org", "b", "main"))
            .with_repo(MockRepo::new("org", "a", "main"));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut settings = RepoSettings::new(&store);
        settings.use_reconciler(Recording(calls.clone()));

        settings
            .apply(&config("repos:\n  org/b: {}\n  org/a: {}\n"))
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["org/b", "org/a"]);
    }

    #[tokio::test]
    async fn test_default_reconcilers_run_in_fixed_order() {
        let store = MockStore::new().with_repo(
            MockRepo::new("org", "repo", "main")
                .with_protected_branch("main", Default::default())
                .with_label("bug", "d73a4a", None),
        );
        let settings = RepoSettings::with_default_reconcilers(&store);

        let report = settings
            .apply(&config(
                r#"
repos:
  org/repo:
    features: {issues: true}
    branch-protection: {enforce-admins: true}
    labels: {bug: {}}
"#,
            ))
            .await
            .unwrap();

        let names: Vec<&str> = report.repositories[0]
            .outcomes
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names, vec!["Repo settings", "Branch protection", "Labels"]);

        let kinds: Vec<OperationKind> = store.operations().iter().map(|op| op.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Resolve,
                OperationKind::ReadMetadata,
                OperationKind::WriteMetadata,
                OperationKind::ListBranches,
                OperationKind::ReadProtection,
                OperationKind::WriteProtection,
                OperationKind::ListLabels,
            ]
        );
    }

    #[tokio::test]
    async fn test_store_error_aborts_remaining_repositories() {
        let store = MockStore::new()
            .with_repo(MockRepo::new("org", "a", "main"))
            .with_repo(MockRepo::new("org", "b", "main"))
            .fail_on(
                OperationKind::WriteMetadata,
                Some("org/a"),
                StoreError::Transport("reset".to_string()),
            );
        let settings = RepoSettings::with_default_reconcilers(&store);

        let result = settings
            .apply(&config(
                "repos:\n  org/a: {delete-branch-on-merge: true}\n  org/b: {delete-branch-on-merge: true}\n",
            ))
            .await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.count(OperationKind::Resolve), 1);
    }

    #[tokio::test]
    async fn test_unknown_repository_fails() {
        let store = MockStore::new();
        let settings = RepoSettings::with_default_reconcilers(&store);

        let result = settings.apply(&config("repos:\n  org/missing: {}\n")).await;

        assert!(matches!(
            result,
            Err(Error::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_label_failures_are_counted_not_raised() {
        let store = MockStore::new()
            .with_repo(MockRepo::new("org", "repo", "main"))
            .fail_on(
                OperationKind::CreateLabel,
                None,
                StoreError::RateLimited,
            );
        let settings = RepoSettings::with_default_reconcilers(&store);

        let report = settings
            .apply(&config("repos:\n  org/repo:\n    labels: {a: {}, b: {}}\n"))
            .await
            .unwrap();

        assert_eq!(report.label_failures(), 2);
    }
}
