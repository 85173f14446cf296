//! Branch Protection Reconciliation
//!
//! Resolves which rule set applies to each branch (global rules, per-branch
//! overrides, default-branch policy), translates it to the canonical
//! protection fields and applies it where it differs from the live state.

use tracing::{debug, info, warn};

use crate::config::{BranchRule, RepoConfig, Restrictions};
use crate::error::Result;
use crate::fields::{has_changes, FieldValue, Fields};
use crate::store::{BranchHandle, RepoHandle, RepositoryStore};

/// Why a branch was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not protected and not covered by the default-branch policy
    OutOfScope,

    /// In scope, but its rule set translates to no settings
    NoRules,
}

/// Per-branch result of branch protection reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome {
    Applied {
        branch: String,
        settings: Fields,
        /// The branch had no protection before, so nothing was compared
        first_time: bool,
    },
    Unchanged {
        branch: String,
    },
    Skipped {
        branch: String,
        reason: SkipReason,
    },
}

/// Result of branch protection reconciliation for one repository
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtectionReport {
    /// False when neither global rules nor overrides are configured
    pub managed: bool,
    pub branches: Vec<BranchOutcome>,
}

impl ProtectionReport {
    pub fn applied(&self) -> usize {
        self.branches
            .iter()
            .filter(|b| matches!(b, BranchOutcome::Applied { .. }))
            .count()
    }

    pub fn unchanged(&self) -> usize {
        self.branches
            .iter()
            .filter(|b| matches!(b, BranchOutcome::Unchanged { .. }))
            .count()
    }
}

/// Rule set for `branch`: an override for that exact name wholly replaces the
/// global rules, otherwise the global rules apply
pub fn rules_for<'a>(branch: &str, config: &'a RepoConfig) -> Option<&'a BranchRule> {
    config
        .branch_protection_overrides
        .get(branch)
        .or(config.branch_protection.as_ref())
}

/// Whether `branch` takes part in branch protection reconciliation
pub fn in_scope(branch: &BranchHandle, repo: &RepoHandle, config: &RepoConfig) -> bool {
    branch.protected
        || (config.protect_default_branch.unwrap_or(false) && branch.is_default_of(repo))
}

fn insert_list(settings: &mut Fields, name: &str, values: &Option<Vec<String>>) {
    if let Some(values) = values {
        settings.insert(name.to_string(), FieldValue::List(values.clone()));
    }
}

fn insert_flag(settings: &mut Fields, name: &str, value: Option<bool>) {
    if let Some(value) = value {
        settings.insert(name.to_string(), FieldValue::Bool(value));
    }
}

fn insert_restrictions(settings: &mut Fields, names: [&str; 3], restrictions: &Restrictions) {
    insert_list(settings, names[0], &restrictions.users);
    insert_list(settings, names[1], &restrictions.teams);
    insert_list(settings, names[2], &restrictions.apps);
}

/// Translate a branch rule into canonical protection fields
///
/// Sub-keys that are not configured are omitted rather than emptied.
pub fn translate_rule(rule: &BranchRule) -> Fields {
    let mut settings = Fields::new();

    // The misspelled key goes first so the correct spelling wins when both are set
    if let Some(dismiss) = rule.deprecated_dismiss_stale_reviews {
        warn!(
            "Using deprecated 'dissmiss-stale-reviews', please replace it with 'dismiss-stale-reviews'"
        );
        settings.insert("dismiss_stale_reviews".to_string(), dismiss.into());
    }
    insert_flag(&mut settings, "dismiss_stale_reviews", rule.dismiss_stale_reviews);

    if let Some(count) = rule.required_review_count {
        settings.insert("required_approving_review_count".to_string(), count.into());
    }

    if let Some(reviews) = &rule.required_pull_request_reviews {
        if let Some(dismissal) = &reviews.dismissal_restrictions {
            insert_restrictions(
                &mut settings,
                ["dismissal_users", "dismissal_teams", "dismissal_apps"],
                dismissal,
            );
        }
        if let Some(bypass) = &reviews.bypass_pull_request_allowances {
            insert_restrictions(
                &mut settings,
                [
                    "users_bypass_pull_request_allowances",
                    "teams_bypass_pull_request_allowances",
                    "apps_bypass_pull_request_allowances",
                ],
                bypass,
            );
        }
    }

    if let Some(push) = &rule.push_restrictions {
        insert_restrictions(
            &mut settings,
            [
                "user_push_restrictions",
                "team_push_restrictions",
                "app_push_restrictions",
            ],
            push,
        );
    }

    insert_flag(&mut settings, "enforce_admins", rule.enforce_admins);
    insert_flag(&mut settings, "block_creations", rule.block_creations);
    insert_flag(
        &mut settings,
        "required_linear_history",
        rule.required_linear_history,
    );
    insert_flag(&mut settings, "allow_force_pushes", rule.allow_force_pushes);
    insert_flag(
        &mut settings,
        "required_conversation_resolution",
        rule.required_conversation_resolution,
    );
    insert_flag(&mut settings, "lock_branch", rule.lock_branch);
    insert_flag(&mut settings, "allow_fork_syncing", rule.allow_fork_syncing);

    settings
}

/// Branch Protection Reconciler
pub struct BranchProtectionReconciler;

impl BranchProtectionReconciler {
    /// Reconcile protection of every in-scope branch
    ///
    /// Branches that are not protected yet have nothing to compare against,
    /// so their settings are written unconditionally.
    ///
    /// # Errors
    /// The first read or write failure aborts the remaining branches
    pub async fn apply(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<ProtectionReport> {
        if config.branch_protection.is_none() && config.branch_protection_overrides.is_empty() {
            debug!("No branch protection configured");
            return Ok(ProtectionReport::default());
        }

        let mut report = ProtectionReport {
            managed: true,
            branches: Vec::new(),
        };

        for branch in store.list_branches(repo).await? {
            let outcome = self.reconcile_branch(store, repo, &branch, config).await?;
            report.branches.push(outcome);
        }

        Ok(report)
    }

    async fn reconcile_branch(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        branch: &BranchHandle,
        config: &RepoConfig,
    ) -> Result<BranchOutcome> {
        let skipped = |reason| BranchOutcome::Skipped {
            branch: branch.name.clone(),
            reason,
        };

        if !in_scope(branch, repo, config) {
            return Ok(skipped(SkipReason::OutOfScope));
        }

        let settings = rules_for(&branch.name, config)
            .map(translate_rule)
            .unwrap_or_default();
        if settings.is_empty() {
            debug!("No branch protection rules for '{}'", branch.name);
            return Ok(skipped(SkipReason::NoRules));
        }

        if branch.protected {
            let current = store.read_protection(repo, branch).await?;
            if !has_changes(&settings, &current) {
                info!("Branch protection settings for {} unchanged.", branch.name);
                return Ok(BranchOutcome::Unchanged {
                    branch: branch.name.clone(),
                });
            }
        }

        info!("Applying branch protection settings to '{}'...", branch.name);
        store.write_protection(repo, branch, &settings).await?;
        Ok(BranchOutcome::Applied {
            branch: branch.name.clone(),
            settings,
            first_time: !branch.protected,
        })
    }
}
