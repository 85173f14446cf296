//! # gh-reposettings
//!
//! Declarative GitHub repository settings management built with Rust
//!
//! ## Features
//! - Repository feature toggles and merge strategies
//! - Branch protection with per-branch overrides
//! - Label reconciliation with rename and replacement support
//! - Dry-run mode

pub mod config;
pub mod error;
pub mod fields;
pub mod github;
pub mod labels;
pub mod metadata;
pub mod mock;
pub mod protection;
pub mod settings;
pub mod similarity;
pub mod store;

pub use config::{LabelSpec, RepoConfig, RepoSettingsConfig};
pub use error::{Error, Result};
pub use github::GitHubClient;
pub use labels::{EditNullPolicy, LabelReconciler, LabelReport};
pub use metadata::MetadataReconciler;
pub use protection::BranchProtectionReconciler;
pub use settings::{Reconciler, RepoSettings, RunReport};
pub use store::{DryRunStore, RepositoryStore, StoreError};

/// Apply a validated configuration through an authenticated client
///
/// Runs the metadata, branch protection and label reconcilers against every
/// configured repository. With `dry_run` set, reads reach GitHub but writes
/// are only logged.
///
/// # Examples
///
/// ```rust,no_run
/// use gh_reposettings::{config, GitHubClient, RepoSettingsConfig};
///
/// #[tokio::main]
/// async fn main() -> gh_reposettings::Result<()> {
///     let document = config::load_document("settings.yml")?;
///     let settings = RepoSettingsConfig::from_document(&document)?;
///     let client = GitHubClient::new(&config::access_token_from_env()?).await?;
///
///     let report = gh_reposettings::apply_settings(client, &settings, true).await?;
///
///     println!("Processed {} repositories", report.repositories.len());
///     Ok(())
/// }
/// ```
pub async fn apply_settings(
    client: GitHubClient,
    config: &RepoSettingsConfig,
    dry_run: bool,
) -> Result<RunReport> {
    let report = if dry_run {
        let store = DryRunStore::new(client);
        let settings = RepoSettings::with_default_reconcilers(&store);
        settings.apply(config).await?
    } else {
        let settings = RepoSettings::with_default_reconcilers(&client);
        settings.apply(config).await?
    };

    Ok(report)
}
