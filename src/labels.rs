//! Label Reconciliation
//!
//! Reconciles the label set of a repository in a single pass over a snapshot
//! of its live labels.
//!
//! # Identity resolution
//!
//! Each live label is matched to a desired label:
//! 1. a desired entry with the same (case-sensitive) name, else
//! 2. the first desired entry, in configuration order, whose `replaces`
//!    list contains the live name, else
//! 3. nothing, and the live label is deleted.
//!
//! A matched label is renamed/edited in place, unless the target name is
//! already held by a different label still present in the repository. In that
//! case every issue tagged with the old label is retagged with the target and
//! the old label is deleted. Live labels are visited in listing order, so when
//! two live labels converge on the same target the first one is renamed and
//! the second one is treated as a collision.
//!
//! Desired names that no live label matched are created afterwards.
//!
//! Every create, edit, delete and retag is attempted independently; failures
//! are collected in the [`LabelReport`] instead of aborting the pass.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::{LabelSpec, RepoConfig, Setting};
use crate::error::Result;
use crate::fields::{changed_fields, has_changes, FieldSource, FieldValue, Fields};
use crate::similarity::closest_label;
use crate::store::{LabelWrite, LiveLabel, RepoHandle, RepositoryStore};

/// What an explicit `null` color or description means when editing a label
///
/// On create, `null` always leaves the field to the remote default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditNullPolicy {
    /// Keep the live value
    #[default]
    PreserveCurrent,

    /// Reset the description to empty; the color is kept since it cannot be unset
    ClearRemote,
}

/// Label operation attempted during reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOperation {
    /// Create a label no live label matched
    Create {
        name: String,
        color: Option<String>,
        description: Option<String>,
    },

    /// Rename and/or update a live label in place
    Edit {
        current_name: String,
        new_name: String,
        changes: Vec<String>,
    },

    /// Delete a live label that matches nothing
    Delete { name: String, reason: String },

    /// Move issues from a live label to an existing label, then delete it
    Replace {
        name: String,
        replacement: String,
        /// Issues successfully retagged
        retagged: Vec<u64>,
    },

    /// Live label already matches
    NoChange { name: String },
}

impl LabelOperation {
    /// Name of the label the operation acted on
    pub fn label_name(&self) -> &str {
        match self {
            LabelOperation::Create { name, .. }
            | LabelOperation::Delete { name, .. }
            | LabelOperation::Replace { name, .. }
            | LabelOperation::NoChange { name } => name,
            LabelOperation::Edit { current_name, .. } => current_name,
        }
    }
}

/// Outcome of one label operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelStatus {
    Ok,
    Failed(String),
}

/// A label operation and its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct LabelResult {
    pub operation: LabelOperation,
    pub status: LabelStatus,
}

impl LabelResult {
    fn ok(operation: LabelOperation) -> Self {
        Self {
            operation,
            status: LabelStatus::Ok,
        }
    }

    fn failed(operation: LabelOperation, reason: String) -> Self {
        Self {
            operation,
            status: LabelStatus::Failed(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == LabelStatus::Ok
    }
}

/// Label reconciliation result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelReport {
    /// False when the repository has no `labels` section
    pub managed: bool,

    /// Every attempted operation, in execution order
    pub results: Vec<LabelResult>,
}

impl LabelReport {
    fn count(&self, predicate: impl Fn(&LabelOperation) -> bool) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_ok() && predicate(&r.operation))
            .count()
    }

    /// Number of labels created
    pub fn created(&self) -> usize {
        self.count(|op| matches!(op, LabelOperation::Create { .. }))
    }

    /// Number of labels edited or renamed
    pub fn edited(&self) -> usize {
        self.count(|op| matches!(op, LabelOperation::Edit { .. }))
    }

    /// Number of labels deleted for matching nothing
    pub fn deleted(&self) -> usize {
        self.count(|op| matches!(op, LabelOperation::Delete { .. }))
    }

    /// Number of labels folded into an existing label
    pub fn replaced(&self) -> usize {
        self.count(|op| matches!(op, LabelOperation::Replace { .. }))
    }

    /// Number of labels unchanged
    pub fn unchanged(&self) -> usize {
        self.count(|op| matches!(op, LabelOperation::NoChange { .. }))
    }

    /// Operations that encountered errors
    pub fn failures(&self) -> Vec<&LabelResult> {
        self.results.iter().filter(|r| !r.is_ok()).collect()
    }

    /// Whether any change was made
    pub fn has_changes(&self) -> bool {
        self.created() + self.edited() + self.deleted() + self.replaced() > 0
    }
}

/// Desired label matched by a live label name
///
/// Exact name first, then the first entry listing the name in `replaces`.
pub fn resolve_target<'a>(
    desired: &'a IndexMap<String, LabelSpec>,
    live_name: &str,
) -> Option<(&'a str, &'a LabelSpec)> {
    if let Some((name, spec)) = desired.get_key_value(live_name) {
        return Some((name.as_str(), spec));
    }

    desired
        .iter()
        .find(|(_, spec)| spec.replaces.iter().any(|prior| prior == live_name))
        .map(|(name, spec)| (name.as_str(), spec))
}

/// Label Reconciler
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelReconciler {
    null_policy: EditNullPolicy,
}

impl LabelReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_null_policy(null_policy: EditNullPolicy) -> Self {
        Self { null_policy }
    }

    /// Reconcile the repository's labels with the `labels` section
    ///
    /// # Errors
    /// Only a failure to list the live labels is returned; per-label
    /// failures are recorded in the report.
    pub async fn apply(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        config: &RepoConfig,
    ) -> Result<LabelReport> {
        let Some(desired) = &config.labels else {
            debug!("No labels configured");
            return Ok(LabelReport::default());
        };

        let mut report = LabelReport {
            managed: true,
            results: Vec::new(),
        };

        let live_labels = store.list_labels(repo).await?;
        let mut present: HashSet<String> = live_labels.iter().map(|l| l.name.clone()).collect();
        let mut unresolved: IndexMap<&str, &LabelSpec> =
            desired.iter().map(|(name, spec)| (name.as_str(), spec)).collect();

        for label in &live_labels {
            let Some((target, spec)) = resolve_target(desired, &label.name) else {
                let result = self.delete_unmatched(store, repo, label, desired).await;
                if result.is_ok() {
                    present.remove(&label.name);
                }
                report.results.push(result);
                continue;
            };

            let result = if target != label.name && present.contains(target) {
                let result = self.replace_with_existing(store, repo, label, target).await;
                if result.is_ok() {
                    present.remove(&label.name);
                }
                result
            } else {
                let result = self.update(store, repo, label, target, spec).await;
                if result.is_ok() && target != label.name {
                    present.remove(&label.name);
                    present.insert(target.to_string());
                }
                result
            };
            report.results.push(result);

            unresolved.shift_remove(target);
        }

        for (name, spec) in unresolved {
            report.results.push(self.create(store, repo, name, spec).await);
        }

        Ok(report)
    }

    async fn delete_unmatched(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        label: &LiveLabel,
        desired: &IndexMap<String, LabelSpec>,
    ) -> LabelResult {
        if let Some(similar) = closest_label(&label.name, desired.keys().map(String::as_str)) {
            warn!(
                "Label '{}' is not configured but resembles '{}'; list it under 'replaces' to keep its issues",
                label.name, similar
            );
        }

        info!("Deleting label {}", label.name);
        let operation = LabelOperation::Delete {
            name: label.name.clone(),
            reason: "Not defined in configuration".to_string(),
        };
        match store.delete_label(repo, label).await {
            Ok(()) => LabelResult::ok(operation),
            Err(e) => {
                warn!("Error deleting '{}' label: {}", label.name, e);
                LabelResult::failed(operation, e.to_string())
            }
        }
    }

    /// Retag every issue carrying `label` with `replacement`, then delete `label`
    ///
    /// `label` is kept when any issue could not be retagged, so a later run
    /// can finish the move.
    async fn replace_with_existing(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        label: &LiveLabel,
        replacement: &str,
    ) -> LabelResult {
        info!("Replacing {} with {} on all issues", label.name, replacement);
        let mut operation = LabelOperation::Replace {
            name: label.name.clone(),
            replacement: replacement.to_string(),
            retagged: Vec::new(),
        };

        let entities = match store.find_entities_by_label(repo, label).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Error listing issues labelled '{}': {}", label.name, e);
                return LabelResult::failed(operation, e.to_string());
            }
        };

        let mut retag_errors = Vec::new();
        for entity in &entities {
            match store.retag_entity(repo, entity, replacement).await {
                Ok(()) => {
                    if let LabelOperation::Replace { retagged, .. } = &mut operation {
                        retagged.push(entity.number);
                    }
                }
                Err(e) => {
                    warn!(
                        "Error adding label '{}' to issue #{}: {}",
                        replacement, entity.number, e
                    );
                    retag_errors.push(format!("#{}: {}", entity.number, e));
                }
            }
        }

        if !retag_errors.is_empty() {
            return LabelResult::failed(
                operation,
                format!(
                    "kept '{}', could not retag {}",
                    label.name,
                    retag_errors.join("; ")
                ),
            );
        }

        match store.delete_label(repo, label).await {
            Ok(()) => LabelResult::ok(operation),
            Err(e) => {
                warn!("Error deleting '{}' label: {}", label.name, e);
                LabelResult::failed(operation, e.to_string())
            }
        }
    }

    /// Desired name, color and description of a matched label
    ///
    /// Color and description not given in the configuration fall back to the live value.
    fn desired_fields(&self, label: &LiveLabel, target: &str, spec: &LabelSpec) -> Fields {
        let color = spec
            .normalized_color()
            .unwrap_or_else(|| label.color.clone());

        let description = match (&spec.description, self.null_policy) {
            (Setting::Value(description), _) => description.clone(),
            (Setting::Clear, EditNullPolicy::ClearRemote) => String::new(),
            (Setting::Unset | Setting::Clear, _) => label.description.clone().unwrap_or_default(),
        };

        Fields::from([
            ("name".to_string(), FieldValue::Str(target.to_string())),
            ("color".to_string(), FieldValue::Str(color)),
            ("description".to_string(), FieldValue::Str(description)),
        ])
    }

    async fn update(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        label: &LiveLabel,
        target: &str,
        spec: &LabelSpec,
    ) -> LabelResult {
        let desired = self.desired_fields(label, target, spec);
        if !has_changes(&desired, label) {
            debug!("Label {} unchanged", label.name);
            return LabelResult::ok(LabelOperation::NoChange {
                name: label.name.clone(),
            });
        }

        let changes = changed_fields(&desired, label)
            .into_iter()
            .map(|field| {
                let from = label.field(&field).map(|v| v.to_string()).unwrap_or_default();
                format!("{}: {} -> {}", field, from, desired[&field])
            })
            .collect();

        let text = |name: &str| match &desired[name] {
            FieldValue::Str(value) => value.clone(),
            other => other.to_string(),
        };
        let description = text("description");
        let update = LabelWrite {
            name: target.to_string(),
            color: Some(text("color")),
            // an empty description on a label that has none is left alone
            description: if description.is_empty() && label.description.is_none() {
                None
            } else {
                Some(description)
            },
        };

        info!("Editing label {}", label.name);
        let operation = LabelOperation::Edit {
            current_name: label.name.clone(),
            new_name: target.to_string(),
            changes,
        };
        match store.edit_label(repo, label, &update).await {
            Ok(()) => LabelResult::ok(operation),
            Err(e) => {
                warn!("Error editing label '{}': {}", label.name, e);
                LabelResult::failed(operation, e.to_string())
            }
        }
    }

    async fn create(
        &self,
        store: &dyn RepositoryStore,
        repo: &RepoHandle,
        name: &str,
        spec: &LabelSpec,
    ) -> LabelResult {
        info!("Creating label {}", name);
        let write = LabelWrite {
            name: name.to_string(),
            color: spec.normalized_color(),
            description: spec.description.value().cloned(),
        };
        let operation = LabelOperation::Create {
            name: write.name.clone(),
            color: write.color.clone(),
            description: write.description.clone(),
        };
        match store.create_label(repo, &write).await {
            Ok(()) => LabelResult::ok(operation),
            Err(e) => {
                warn!("Error creating label '{}': {}", name, e);
                LabelResult::failed(operation, e.to_string())
            }
        }
    }
}
