//! Configuration Management
//!
//! Desired repository settings document: loading, typed model and validation

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

use crate::error::{Error, Result};

/// Environment variable holding the GitHub access token
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Tri-state configuration value
///
/// Distinguishes a key that is absent from one explicitly set to `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting<T> {
    /// Key not present: leave the field alone
    Unset,

    /// Key present with a `null` value: fall back to the remote default
    Clear,

    /// Key present with a value
    Value(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Unset
    }
}

impl<T> Setting<T> {
    /// The configured value, if one was given
    pub fn value(&self) -> Option<&T> {
        match self {
            Setting::Value(value) => Some(value),
            Setting::Unset | Setting::Clear => None,
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Setting::Clear)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Setting<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Only called when the key is present; absence is handled by #[serde(default)]
        Ok(Option::<T>::deserialize(deserializer)?.map_or(Setting::Clear, Setting::Value))
    }
}

/// Label Specification
///
/// Desired state of one label, keyed by its name in [`RepoConfig::labels`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LabelSpec {
    /// Label color (6-digit hex code, # prefix optional)
    #[serde(default)]
    pub color: Setting<String>,

    /// Label description
    #[serde(default)]
    pub description: Setting<String>,

    /// Prior label names this entry supersedes, in order
    #[serde(default)]
    pub replaces: Vec<String>,
}

impl LabelSpec {
    /// Configured color in the form the remote reports it (lowercase, no #)
    pub fn normalized_color(&self) -> Option<String> {
        self.color.value().map(|color| normalize_color(color))
    }

    /// Validate label specification
    ///
    /// # Errors
    /// - If the name is empty
    /// - If the color format is invalid
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::config_validation("Label name cannot be empty"));
        }

        if let Some(color) = self.normalized_color() {
            if !is_valid_hex_color(&color) {
                return Err(Error::config_validation(format!(
                    "Invalid color for label '{}': {} (expected 6-digit hex)",
                    name,
                    self.color.value().map(String::as_str).unwrap_or_default()
                )));
            }
        }

        Ok(())
    }
}

/// Users, teams and apps allowed by a restriction block
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Restrictions {
    pub users: Option<Vec<String>>,
    pub teams: Option<Vec<String>>,
    pub apps: Option<Vec<String>>,
}

/// `required-pull-request-reviews` block of a branch rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PullRequestReviewRules {
    pub dismissal_restrictions: Option<Restrictions>,
    pub bypass_pull_request_allowances: Option<Restrictions>,
}

/// Branch protection rule set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BranchRule {
    pub dismiss_stale_reviews: Option<bool>,

    /// Historical misspelling of `dismiss-stale-reviews`, still honored
    #[serde(rename = "dissmiss-stale-reviews")]
    pub deprecated_dismiss_stale_reviews: Option<bool>,

    pub required_review_count: Option<u32>,
    pub required_pull_request_reviews: Option<PullRequestReviewRules>,
    pub push_restrictions: Option<Restrictions>,
    pub enforce_admins: Option<bool>,
    pub block_creations: Option<bool>,
    pub required_linear_history: Option<bool>,
    pub allow_force_pushes: Option<bool>,
    pub required_conversation_resolution: Option<bool>,
    pub lock_branch: Option<bool>,
    pub allow_fork_syncing: Option<bool>,
}

/// Desired configuration of a single repository
///
/// Every section is optional; an absent section is not managed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepoConfig {
    #[serde(default)]
    pub features: IndexMap<String, bool>,

    #[serde(default)]
    pub allow: IndexMap<String, bool>,

    pub delete_branch_on_merge: Option<bool>,

    pub branch_protection: Option<BranchRule>,

    #[serde(default)]
    pub branch_protection_overrides: IndexMap<String, BranchRule>,

    pub protect_default_branch: Option<bool>,

    #[serde(default, deserialize_with = "deserialize_labels")]
    pub labels: Option<IndexMap<String, LabelSpec>>,
}

/// Label entries may be written without a body (`bug:`)
fn deserialize_labels<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<IndexMap<String, LabelSpec>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<IndexMap<String, Option<LabelSpec>>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|labels| {
        labels
            .into_iter()
            .map(|(name, spec)| (name, spec.unwrap_or_default()))
            .collect()
    }))
}

impl RepoConfig {
    /// Validate the label section
    ///
    /// # Errors
    /// - If a label specification is invalid
    /// - If two entries list the same prior name in `replaces`
    /// - If an entry replaces a name that is itself a desired label
    pub fn validate(&self) -> Result<()> {
        let Some(labels) = &self.labels else {
            return Ok(());
        };

        let mut replaced_by: HashMap<&str, &str> = HashMap::new();
        for (name, spec) in labels {
            spec.validate(name)?;

            for prior in &spec.replaces {
                if prior != name && labels.contains_key(prior) {
                    return Err(Error::config_validation(format!(
                        "Label '{}' replaces '{}', which is itself a configured label",
                        name, prior
                    )));
                }
                if let Some(other) = replaced_by.insert(prior.as_str(), name.as_str()) {
                    if other != name {
                        return Err(Error::config_validation(format!(
                            "Label '{}' is replaced by both '{}' and '{}'",
                            prior, other, name
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Top-level desired settings document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoSettingsConfig {
    /// Normalised `owner/name` identifier to repository configuration, in document order
    pub repos: IndexMap<String, RepoConfig>,
}

impl RepoSettingsConfig {
    /// Build and validate the settings from a loaded document
    ///
    /// # Errors
    /// - If the document is not a mapping or has no non-empty `repos` mapping
    /// - If a repository identifier cannot be normalised
    /// - If a repository section does not match the expected shape
    pub fn from_document(document: &Value) -> Result<Self> {
        let repos = document
            .as_mapping()
            .and_then(|root| root.get("repos"))
            .ok_or_else(|| Error::config_validation("Configuration must contain a 'repos' mapping"))?
            .as_mapping()
            .ok_or_else(|| Error::config_validation("'repos' must be a mapping"))?;

        if repos.is_empty() {
            return Err(Error::config_validation("'repos' must not be empty"));
        }

        let mut config = Self::default();
        for (identifier, section) in repos {
            let identifier = identifier.as_str().ok_or_else(|| {
                Error::config_validation(format!("Invalid repository key: {:?}", identifier))
            })?;
            let full_name = normalize_repository(identifier)?;

            let repo_config: RepoConfig = if section.is_null() {
                RepoConfig::default()
            } else {
                serde_yaml::from_value(section.clone()).map_err(|e| {
                    Error::config_validation(format!("Invalid settings for '{}': {}", identifier, e))
                })?
            };
            repo_config.validate().map_err(|e| match e {
                Error::ConfigValidation(message) => {
                    Error::config_validation(format!("{}: {}", full_name, message))
                }
                other => other,
            })?;

            if config.repos.insert(full_name.clone(), repo_config).is_some() {
                return Err(Error::config_validation(format!(
                    "Repository '{}' is configured more than once",
                    full_name
                )));
            }
        }

        Ok(config)
    }
}

/// Load the settings document from a YAML (or JSON) file
///
/// Only checks that the file is readable and well-formed; structural
/// validation is [`RepoSettingsConfig::from_document`].
///
/// # Errors
/// If file reading or parsing fails
pub fn load_document<P: AsRef<Path>>(path: P) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Strip scheme and host from a repository identifier
///
/// Accepts `owner/name`, `github.com/owner/name` and
/// `https://host/owner/name`, with an optional trailing `/` or `.git`.
///
/// # Errors
/// Returns an error if no `owner/name` pair remains
pub fn normalize_repository(identifier: &str) -> Result<String> {
    let trimmed = identifier.trim();

    let path = if trimmed.contains("://") {
        let url = url::Url::parse(trimmed)
            .map_err(|_| Error::InvalidRepositoryFormat(identifier.to_string()))?;
        url.path().to_string()
    } else {
        match trimmed.split_once('/') {
            Some((host, rest)) if host.contains('.') => rest.to_string(),
            _ => trimmed.to_string(),
        }
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let (owner, repo) = parse_repository(path)
        .map_err(|_| Error::InvalidRepositoryFormat(identifier.to_string()))?;
    Ok(format!("{}/{}", owner, repo))
}

/// Parse repository string into owner and name
///
/// # Arguments
/// - `repo`: Repository string in "owner/repo" format
///
/// # Errors
/// Returns an error if the format is invalid
pub fn parse_repository(repo: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = repo.split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(Error::InvalidRepositoryFormat(repo.to_string()));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Read the access token from the environment
///
/// # Errors
/// Returns `MissingCredential` if the variable is unset or empty
pub fn access_token_from_env() -> Result<String> {
    std::env::var(TOKEN_ENV_VAR)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| Error::MissingCredential(format!("could not read ${}", TOKEN_ENV_VAR)))
}

/// Normalize color (remove # and convert to lowercase)
pub fn normalize_color(color: &str) -> String {
    color.trim().trim_start_matches('#').to_lowercase()
}

/// Validate hex color code
///
/// # Arguments
/// - `color`: Color code (6-digit hex without #)
///
/// # Returns
/// True if valid
fn is_valid_hex_color(color: &str) -> bool {
    if color.len() != 6 {
        return false;
    }

    color.chars().all(|c| c.is_ascii_hexdigit())
}
