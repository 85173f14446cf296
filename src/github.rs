//! GitHub API Client
//!
//! `RepositoryStore` implementation backed by the GitHub REST API

use async_trait::async_trait;
use octocrab::{params, Octocrab};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::parse_repository;
use crate::error::{Error, Result};
use crate::fields::{FieldValue, Fields};
use crate::store::{
    BranchHandle, EntityHandle, LabelWrite, LiveLabel, RepoHandle, RepositoryStore, StoreError,
};

/// Page size used for every listing call
const PER_PAGE: u8 = 100;

/// Protection flags GitHub reports as `{"<name>": {"enabled": bool}}`
const ENABLED_FLAGS: &[&str] = &[
    "enforce_admins",
    "block_creations",
    "required_linear_history",
    "allow_force_pushes",
    "required_conversation_resolution",
    "lock_branch",
    "allow_fork_syncing",
];

/// Optional top-level flags of the protection update request
const OPTIONAL_REQUEST_FLAGS: &[&str] = &[
    "block_creations",
    "required_linear_history",
    "allow_force_pushes",
    "required_conversation_resolution",
    "lock_branch",
    "allow_fork_syncing",
];

const DISMISSAL_FIELDS: [&str; 3] = ["dismissal_users", "dismissal_teams", "dismissal_apps"];
const BYPASS_FIELDS: [&str; 3] = [
    "users_bypass_pull_request_allowances",
    "teams_bypass_pull_request_allowances",
    "apps_bypass_pull_request_allowances",
];
const PUSH_FIELDS: [&str; 3] = [
    "user_push_restrictions",
    "team_push_restrictions",
    "app_push_restrictions",
];

/// Encode a string for use in URL path segments (RFC 3986 with UTF-8 support)
///
/// Only unreserved characters (A-Z, a-z, 0-9, -, ., _, ~) are left unencoded.
///
/// # Arguments
/// - `input`: The string to encode
///
/// # Returns
/// URL-encoded string safe for use in path segments
fn encode_path_segment(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            // RFC 3986 unreserved characters
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '.' | '_' | '~' => c.to_string(),
            // Everything else gets percent-encoded as UTF-8 bytes
            _ => c
                .to_string()
                .bytes()
                .map(|b| format!("%{:02X}", b))
                .collect::<String>(),
        })
        .collect()
}

/// Map an octocrab failure onto the store error taxonomy
fn store_error(err: octocrab::Error) -> StoreError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            let status = source.status_code.as_u16();
            match status {
                401 => StoreError::AuthenticationFailed(source.message),
                403 | 429 if source.message.to_lowercase().contains("rate limit") => {
                    StoreError::RateLimited
                }
                404 => StoreError::NotFound(source.message),
                _ => StoreError::Api {
                    status,
                    message: source.message,
                },
            }
        }
        other => StoreError::Transport(other.to_string()),
    }
}

fn field_from_json(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Bool(b) => Some(FieldValue::Bool(*b)),
        Value::Number(n) => n.as_i64().map(FieldValue::Int),
        Value::String(s) => Some(FieldValue::Str(s.clone())),
        Value::Null => Some(FieldValue::Null),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(n) => Value::from(*n),
        FieldValue::Str(s) => Value::String(s.clone()),
        FieldValue::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        FieldValue::Null => Value::Null,
    }
}

/// Scalar top-level fields of a repository payload
pub fn flatten_metadata(repository: &Value) -> Fields {
    repository
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| Some((name.clone(), field_from_json(value)?)))
                .collect()
        })
        .unwrap_or_default()
}

/// Identifiers of the users (`login`), teams or apps (`slug`) in a restriction list
fn identifiers(restrictions: &Value, kind: &str) -> Option<Vec<String>> {
    let key = if kind == "users" { "login" } else { "slug" };
    restrictions.get(kind)?.as_array().map(|entries| {
        entries
            .iter()
            .filter_map(|entry| entry.get(key).and_then(Value::as_str).map(str::to_string))
            .collect()
    })
}

fn flatten_restrictions(fields: &mut Fields, names: [&str; 3], restrictions: &Value) {
    for (name, kind) in names.iter().zip(["users", "teams", "apps"]) {
        if let Some(ids) = identifiers(restrictions, kind) {
            fields.insert(name.to_string(), FieldValue::List(ids));
        }
    }
}

/// Branch protection payload flattened to canonical field names
pub fn flatten_protection(protection: &Value) -> Fields {
    let mut fields = Fields::new();

    for name in ENABLED_FLAGS {
        if let Some(enabled) = protection
            .get(*name)
            .and_then(|flag| flag.get("enabled"))
            .and_then(Value::as_bool)
        {
            fields.insert(name.to_string(), FieldValue::Bool(enabled));
        }
    }

    if let Some(reviews) = protection.get("required_pull_request_reviews") {
        if let Some(dismiss) = reviews.get("dismiss_stale_reviews").and_then(Value::as_bool) {
            fields.insert("dismiss_stale_reviews".to_string(), dismiss.into());
        }
        if let Some(count) = reviews
            .get("required_approving_review_count")
            .and_then(Value::as_i64)
        {
            fields.insert("required_approving_review_count".to_string(), count.into());
        }
        if let Some(dismissal) = reviews.get("dismissal_restrictions") {
            flatten_restrictions(&mut fields, DISMISSAL_FIELDS, dismissal);
        }
        if let Some(bypass) = reviews.get("bypass_pull_request_allowances") {
            flatten_restrictions(&mut fields, BYPASS_FIELDS, bypass);
        }
    }

    if let Some(restrictions) = protection.get("restrictions") {
        flatten_restrictions(&mut fields, PUSH_FIELDS, restrictions);
    }

    fields
}

/// `{users, teams, apps}` object when any of `names` is set, missing lists empty
fn restriction_request(settings: &Fields, names: [&str; 3]) -> Option<Value> {
    if !names.iter().any(|name| settings.contains_key(*name)) {
        return None;
    }

    let mut object = Map::new();
    for (name, kind) in names.iter().zip(["users", "teams", "apps"]) {
        let list = settings
            .get(*name)
            .map(field_to_json)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        object.insert(kind.to_string(), list);
    }
    Some(Value::Object(object))
}

/// Branch protection update request built from canonical settings
///
/// The endpoint replaces the whole protection; sections without any
/// configured field are sent as `null`.
pub fn protection_request(settings: &Fields) -> Value {
    let mut reviews = Map::new();
    for name in ["dismiss_stale_reviews", "required_approving_review_count"] {
        if let Some(value) = settings.get(name) {
            reviews.insert(name.to_string(), field_to_json(value));
        }
    }
    if let Some(dismissal) = restriction_request(settings, DISMISSAL_FIELDS) {
        reviews.insert("dismissal_restrictions".to_string(), dismissal);
    }
    if let Some(bypass) = restriction_request(settings, BYPASS_FIELDS) {
        reviews.insert("bypass_pull_request_allowances".to_string(), bypass);
    }

    let mut request = Map::new();
    request.insert("required_status_checks".to_string(), Value::Null);
    request.insert(
        "enforce_admins".to_string(),
        settings
            .get("enforce_admins")
            .map(field_to_json)
            .unwrap_or(Value::Null),
    );
    request.insert(
        "required_pull_request_reviews".to_string(),
        if reviews.is_empty() {
            Value::Null
        } else {
            Value::Object(reviews)
        },
    );
    request.insert(
        "restrictions".to_string(),
        restriction_request(settings, PUSH_FIELDS).unwrap_or(Value::Null),
    );
    for name in OPTIONAL_REQUEST_FLAGS {
        if let Some(value) = settings.get(*name) {
            request.insert(name.to_string(), field_to_json(value));
        }
    }

    Value::Object(request)
}

#[derive(Serialize)]
struct CreateLabelRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct EditLabelRequest<'a> {
    new_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// GitHub API Client
///
/// Client responsible for interactions with the GitHub API
pub struct GitHubClient {
    octocrab: Octocrab,
}

impl GitHubClient {
    /// Create a new GitHub client
    ///
    /// # Arguments
    /// - `access_token`: GitHub access token
    ///
    /// # Errors
    /// Returns an error if client initialization or the authentication check fails
    pub async fn new(access_token: &str) -> Result<Self> {
        let octocrab = Octocrab::builder()
            .personal_token(access_token.to_string())
            .build()
            .map_err(|e| Error::Store(StoreError::Transport(e.to_string())))?;

        // Authentication test
        octocrab.current().user().await.map_err(|e| match store_error(e) {
            StoreError::Transport(message) => StoreError::Transport(message),
            other => StoreError::AuthenticationFailed(other.to_string()),
        })?;

        Ok(Self { octocrab })
    }

    /// Get rate limit information
    ///
    /// # Returns
    /// Rate limit status
    pub async fn get_rate_limit(&self) -> Result<RateLimitInfo> {
        let rate_limit = self.octocrab.ratelimit().get().await.map_err(store_error)?;

        Ok(RateLimitInfo {
            limit: rate_limit.resources.core.limit as u32,
            remaining: rate_limit.resources.core.remaining as u32,
            reset_at: chrono::DateTime::from_timestamp(rate_limit.resources.core.reset as i64, 0)
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    fn label_route(repo: &RepoHandle, name: &str) -> String {
        format!(
            "/repos/{}/{}/labels/{}",
            repo.owner,
            repo.name,
            encode_path_segment(name)
        )
    }

    fn protection_route(repo: &RepoHandle, branch: &BranchHandle) -> String {
        format!(
            "/repos/{}/{}/branches/{}/protection",
            repo.owner,
            repo.name,
            encode_path_segment(&branch.name)
        )
    }
}

#[async_trait]
impl RepositoryStore for GitHubClient {
    async fn resolve(&self, full_name: &str) -> std::result::Result<RepoHandle, StoreError> {
        let (owner, name) = parse_repository(full_name)
            .map_err(|_| StoreError::NotFound(full_name.to_string()))?;
        let repository = self
            .octocrab
            .repos(&owner, &name)
            .get()
            .await
            .map_err(store_error)?;

        Ok(RepoHandle {
            owner,
            name: repository.name,
            default_branch: repository.default_branch.unwrap_or_else(|| "main".to_string()),
        })
    }

    async fn read_metadata(&self, repo: &RepoHandle) -> std::result::Result<Fields, StoreError> {
        let route = format!("/repos/{}/{}", repo.owner, repo.name);
        let repository: Value = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(store_error)?;
        Ok(flatten_metadata(&repository))
    }

    async fn write_metadata(
        &self,
        repo: &RepoHandle,
        fields: &Fields,
    ) -> std::result::Result<(), StoreError> {
        let route = format!("/repos/{}/{}", repo.owner, repo.name);
        let _: Value = self
            .octocrab
            .patch(route, Some(fields))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn list_branches(
        &self,
        repo: &RepoHandle,
    ) -> std::result::Result<Vec<BranchHandle>, StoreError> {
        let mut branches = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .octocrab
                .repos(&repo.owner, &repo.name)
                .list_branches()
                .per_page(PER_PAGE)
                .page(page)
                .send()
                .await
                .map_err(store_error)?;

            if response.items.is_empty() {
                break;
            }

            branches.extend(response.items.into_iter().map(|branch| BranchHandle {
                name: branch.name,
                protected: branch.protected,
            }));

            page += 1;
        }

        Ok(branches)
    }

    async fn read_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
    ) -> std::result::Result<Fields, StoreError> {
        let protection: Value = self
            .octocrab
            .get(Self::protection_route(repo, branch), None::<&()>)
            .await
            .map_err(store_error)?;
        Ok(flatten_protection(&protection))
    }

    async fn write_protection(
        &self,
        repo: &RepoHandle,
        branch: &BranchHandle,
        settings: &Fields,
    ) -> std::result::Result<(), StoreError> {
        let request = protection_request(settings);
        let _: Value = self
            .octocrab
            .put(Self::protection_route(repo, branch), Some(&request))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn list_labels(
        &self,
        repo: &RepoHandle,
    ) -> std::result::Result<Vec<LiveLabel>, StoreError> {
        let mut labels = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .octocrab
                .issues(&repo.owner, &repo.name)
                .list_labels_for_repo()
                .page(page)
                .per_page(PER_PAGE)
                .send()
                .await
                .map_err(store_error)?;

            if response.items.is_empty() {
                break;
            }

            for label in response.items {
                labels.push(LiveLabel {
                    name: label.name,
                    color: label.color.to_lowercase(),
                    description: label.description,
                });
            }

            page += 1;
        }

        Ok(labels)
    }

    async fn create_label(
        &self,
        repo: &RepoHandle,
        label: &LabelWrite,
    ) -> std::result::Result<(), StoreError> {
        let route = format!("/repos/{}/{}/labels", repo.owner, repo.name);
        let request = CreateLabelRequest {
            name: &label.name,
            color: label.color.as_deref(),
            description: label.description.as_deref(),
        };
        let _: Value = self
            .octocrab
            .post(route, Some(&request))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn edit_label(
        &self,
        repo: &RepoHandle,
        current: &LiveLabel,
        update: &LabelWrite,
    ) -> std::result::Result<(), StoreError> {
        let request = EditLabelRequest {
            new_name: &update.name,
            color: update.color.as_deref(),
            description: update.description.as_deref(),
        };
        let _: Value = self
            .octocrab
            .patch(Self::label_route(repo, &current.name), Some(&request))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn delete_label(
        &self,
        repo: &RepoHandle,
        label: &LiveLabel,
    ) -> std::result::Result<(), StoreError> {
        // URL encode the label name to handle spaces, special characters, and UTF-8
        let encoded_name = encode_path_segment(&label.name);
        self.octocrab
            .issues(&repo.owner, &repo.name)
            .delete_label(&encoded_name)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn find_entities_by_label(
        &self,
        repo: &RepoHandle,
        label: &LiveLabel,
    ) -> std::result::Result<Vec<EntityHandle>, StoreError> {
        let label_filter = [label.name.clone()];
        let mut entities = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .octocrab
                .issues(&repo.owner, &repo.name)
                .list()
                .labels(&label_filter)
                .state(params::State::All)
                .per_page(PER_PAGE)
                .page(page)
                .send()
                .await
                .map_err(store_error)?;

            if response.items.is_empty() {
                break;
            }

            entities.extend(response.items.into_iter().map(|issue| EntityHandle {
                number: issue.number,
                title: issue.title,
            }));

            page += 1;
        }

        Ok(entities)
    }

    async fn retag_entity(
        &self,
        repo: &RepoHandle,
        entity: &EntityHandle,
        label_name: &str,
    ) -> std::result::Result<(), StoreError> {
        self.octocrab
            .issues(&repo.owner, &repo.name)
            .add_labels(entity.number, &[label_name.to_string()])
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

/// Rate Limit Information
///
/// Represents GitHub API rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Hourly limit
    pub limit: u32,

    /// Remaining usage count
    pub remaining: u32,

    /// Reset time
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn list(values: &[&str]) -> FieldValue {
        FieldValue::List(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_encode_path_segment() {
        // Basic ASCII characters
        assert_eq!(encode_path_segment("bug"), "bug");
        assert_eq!(encode_path_segment("feature-request"), "feature-request");

        // Spaces and special characters
        assert_eq!(
            encode_path_segment("good first issue"),
            "good%20first%20issue"
        );

        // Non-ASCII characters (UTF-8)
        assert_eq!(encode_path_segment("バグ"), "%E3%83%90%E3%82%B0");

        // Branch names with slashes
        assert_eq!(encode_path_segment("release/1.x"), "release%2F1.x");
    }

    #[test]
    fn test_flatten_metadata_keeps_scalars() {
        let repository = json!({
            "name": "repo",
            "has_issues": true,
            "has_wiki": false,
            "allow_merge_commit": true,
            "forks_count": 3,
            "description": null,
            "owner": {"login": "org"},
            "topics": ["rust"],
        });

        let fields = flatten_metadata(&repository);
        assert_eq!(fields["has_issues"], FieldValue::Bool(true));
        assert_eq!(fields["forks_count"], FieldValue::Int(3));
        assert_eq!(fields["description"], FieldValue::Null);
        assert!(!fields.contains_key("owner"));
        assert!(!fields.contains_key("topics"));
    }

    #[test]
    fn test_flatten_protection() {
        let protection = json!({
            "url": "https://api.github.com/repos/org/repo/branches/main/protection",
            "required_pull_request_reviews": {
                "dismiss_stale_reviews": true,
                "require_code_owner_reviews": false,
                "required_approving_review_count": 2,
                "dismissal_restrictions": {
                    "users": [{"login": "alice", "id": 1}],
                    "teams": [{"slug": "core", "id": 2}],
                    "apps": []
                },
                "bypass_pull_request_allowances": {
                    "users": [],
                    "teams": [],
                    "apps": [{"slug": "renovate"}]
                }
            },
            "restrictions": {
                "users": [{"login": "bob"}],
                "teams": [],
                "apps": []
            },
            "enforce_admins": {"url": "…", "enabled": true},
            "required_linear_history": {"enabled": false},
            "allow_force_pushes": {"enabled": false},
            "lock_branch": {"enabled": false},
            "allow_fork_syncing": {"enabled": true}
        });

        let fields = flatten_protection(&protection);
        let expected: Fields = [
            ("dismiss_stale_reviews", FieldValue::Bool(true)),
            ("required_approving_review_count", FieldValue::Int(2)),
            ("dismissal_users", list(&["alice"])),
            ("dismissal_teams", list(&["core"])),
            ("dismissal_apps", list(&[])),
            ("users_bypass_pull_request_allowances", list(&[])),
            ("teams_bypass_pull_request_allowances", list(&[])),
            ("apps_bypass_pull_request_allowances", list(&["renovate"])),
            ("user_push_restrictions", list(&["bob"])),
            ("team_push_restrictions", list(&[])),
            ("app_push_restrictions", list(&[])),
            ("enforce_admins", FieldValue::Bool(true)),
            ("required_linear_history", FieldValue::Bool(false)),
            ("allow_force_pushes", FieldValue::Bool(false)),
            ("lock_branch", FieldValue::Bool(false)),
            ("allow_fork_syncing", FieldValue::Bool(true)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        assert_eq!(fields, expected);
    }

    #[test]
    fn test_protection_request_minimal() {
        let settings: Fields = [("required_approving_review_count".to_string(), FieldValue::Int(1))]
            .into_iter()
            .collect();

        assert_eq!(
            protection_request(&settings),
            json!({
                "required_status_checks": null,
                "enforce_admins": null,
                "required_pull_request_reviews": {"required_approving_review_count": 1},
                "restrictions": null,
            })
        );
    }

    #[test]
    fn test_protection_request_full() {
        let settings: Fields = [
            ("enforce_admins", FieldValue::Bool(true)),
            ("dismiss_stale_reviews", FieldValue::Bool(true)),
            ("dismissal_users", list(&["alice"])),
            ("user_push_restrictions", list(&["bob"])),
            ("team_push_restrictions", list(&["core"])),
            ("lock_branch", FieldValue::Bool(false)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        assert_eq!(
            protection_request(&settings),
            json!({
                "required_status_checks": null,
                "enforce_admins": true,
                "required_pull_request_reviews": {
                    "dismiss_stale_reviews": true,
                    "dismissal_restrictions": {"users": ["alice"], "teams": [], "apps": []},
                },
                "restrictions": {"users": ["bob"], "teams": ["core"], "apps": []},
                "lock_branch": false,
            })
        );
    }

    #[test]
    fn test_flattened_protection_matches_translated_settings() {
        // What a write produces, read back, compares equal
        let settings: Fields = [
            ("enforce_admins", FieldValue::Bool(true)),
            ("required_linear_history", FieldValue::Bool(true)),
            ("required_approving_review_count", FieldValue::Int(1)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        let live = flatten_protection(&json!({
            "enforce_admins": {"enabled": true},
            "required_linear_history": {"enabled": true},
            "allow_force_pushes": {"enabled": false},
            "required_pull_request_reviews": {"required_approving_review_count": 1},
        }));

        assert!(!crate::fields::has_changes(&settings, &live));
    }

    #[test]
    fn test_label_requests_omit_unset_fields() {
        let create = CreateLabelRequest {
            name: "bug",
            color: None,
            description: Some("broken"),
        };
        assert_eq!(
            serde_json::to_value(&create).unwrap(),
            json!({"name": "bug", "description": "broken"})
        );

        let edit = EditLabelRequest {
            new_name: "defect",
            color: Some("d73a4a"),
            description: None,
        };
        assert_eq!(
            serde_json::to_value(&edit).unwrap(),
            json!({"new_name": "defect", "color": "d73a4a"})
        );
    }
}
