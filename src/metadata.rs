//! Repository Metadata Reconciliation
//!
//! Feature toggles, merge strategies and branch cleanup flags of a repository

use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::error::Result;
use crate::fields::{changed_fields, has_changes, Fields};
use crate::store::{RepoHandle, RepositoryStore};

/// Result of reconciling repository metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataOutcome {
    /// No metadata section configured
    NotManaged,

    /// Live settings already match
    Unchanged,

    /// The full desired mapping was written
    Applied(Fields),
}

/// Translate the metadata sections of a repository config to API field names
///
/// `features.<name>` becomes `has_<name>`, `allow.<name>` becomes
/// `allow_<name>` with dashes turned into underscores, and
/// `delete-branch-on-merge` becomes `delete_branch_on_merge`.
pub fn desired_metadata(config: &RepoConfig) -> Fields {
    let mut fields = Fields::new();

    for (feature, enabled) in &config.features {
        fields.insert(format!("has_{}", feature), (*enabled).into());
    }

    for (strategy, allowed) in &config.allow {
        fields.insert(
            format!("allow_{}", strategy.replace('-', "_")),
            (*allowed).into(),
        );
    }

    if let Some(delete) = config.delete_branch_on_merge {
        fields.insert("delete_branch_on_merge".to_string(), delete.into());
    }

    fields
}

/// Repository Metadata Reconciler
pub struct MetadataReconciler;

impl MetadataReconciler {
    /// Apply the desired metadata with a single combined update when it differs
    ///
    /// # Errors
    /// Returns an error if reading or writing the repository fails
    pub async fn apply(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<MetadataOutcome> {
        let desired = desired_metadata(config);
        if desired.is_empty() {
            debug!("No repo settings configured");
            return Ok(MetadataOutcome::NotManaged);
        }

        let current = store.read_metadata(repo).await?;
        if !has_changes(&desired, &current) {
            info!("Repo settings unchanged.");
            return Ok(MetadataOutcome::Unchanged);
        }

        info!(
            "Applying new repo settings ({})...",
            changed_fields(&desired, &current).join(", ")
        );
        store.write_metadata(repo, &desired).await?;
        Ok(MetadataOutcome::Applied(desired))
    }
}
