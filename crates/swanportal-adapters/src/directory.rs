//! User directory capability.
//!
//! The resolver needs four primitive lookups from the directory; anything
//! smarter (caching, class derivation) lives above this trait. The HTTP
//! implementation speaks a SCIM-shaped REST API.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;

/// Directory failure.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("user not found")]
    NotFound,
}

impl DirectoryError {
    /// Create a backend error from any displayable error.
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

/// An external identity reference on a principal or group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalId {
    /// Issuer URI of the provisioning system.
    pub issuer: String,
    /// Identifier within that system.
    pub id: String,
}

/// An email address entry on a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailEntry {
    /// The address.
    pub value: String,
    /// Whether this is the principal's primary address.
    pub primary: bool,
}

/// A directory principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub user_id: String,
    pub user_name: String,
    pub display_name: String,
    pub emails: Vec<EmailEntry>,
    pub external_ids: Vec<ExternalId>,
}

/// A directory group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub group_id: String,
    pub display_name: String,
    pub external_ids: Vec<ExternalId>,
}

/// Primitive directory lookups.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Find a principal id by an alternate identifier attribute
    /// (`"userName"`, `"emails.value"`). `Ok(None)` when no principal
    /// matches.
    async fn find_user_id(
        &self,
        attribute: &str,
        value: &str,
    ) -> Result<Option<String>, DirectoryError>;

    /// Fetch a principal record.
    async fn describe_user(&self, user_id: &str) -> Result<DirectoryUser, DirectoryError>;

    /// List the ids of the groups a principal is a member of.
    async fn list_group_ids(&self, user_id: &str) -> Result<Vec<String>, DirectoryError>;

    /// Fetch a group record.
    async fn describe_group(&self, group_id: &str) -> Result<DirectoryGroup, DirectoryError>;
}

// ── SCIM HTTP client ──────────────────────────────────────────────

/// Directory client over a SCIM-shaped REST API.
#[derive(Debug)]
pub struct ScimHttpClient {
    client: Client,
    base_url: String,
    bearer_token: String,
}

impl ScimHttpClient {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            client: Client::new(),
            base_url: base.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DirectoryError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(DirectoryError::backend)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(DirectoryError::Backend(format!(
                "HTTP {}",
                resp.status().as_u16()
            )));
        }

        resp.json().await.map_err(DirectoryError::backend)
    }
}

#[async_trait]
impl DirectoryClient for ScimHttpClient {
    async fn find_user_id(
        &self,
        attribute: &str,
        value: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let filter = format!("{attribute} eq \"{value}\"");
        let page: wire::ListResponse<wire::User> = self
            .get_json("/Users", &[("filter", filter.as_str()), ("count", "1")])
            .await?;
        Ok(page.resources.into_iter().next().map(|u| u.id))
    }

    async fn describe_user(&self, user_id: &str) -> Result<DirectoryUser, DirectoryError> {
        let user: wire::User = self.get_json(&format!("/Users/{user_id}"), &[]).await?;
        Ok(user.into())
    }

    async fn list_group_ids(&self, user_id: &str) -> Result<Vec<String>, DirectoryError> {
        let filter = format!("members.value eq \"{user_id}\"");
        let page: wire::ListResponse<wire::Group> = self
            .get_json("/Groups", &[("filter", filter.as_str())])
            .await?;
        Ok(page.resources.into_iter().map(|g| g.id).collect())
    }

    async fn describe_group(&self, group_id: &str) -> Result<DirectoryGroup, DirectoryError> {
        let group: wire::Group = self.get_json(&format!("/Groups/{group_id}"), &[]).await?;
        Ok(group.into())
    }
}

/// Wire types matching the SCIM resource schema.
mod wire {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct ListResponse<T> {
        #[serde(rename = "Resources", default = "Vec::new")]
        pub resources: Vec<T>,
    }

    #[derive(Deserialize)]
    pub struct User {
        pub id: String,
        #[serde(rename = "userName", default)]
        pub user_name: String,
        #[serde(rename = "displayName", default)]
        pub display_name: String,
        #[serde(default)]
        pub emails: Vec<Email>,
        #[serde(rename = "externalIds", default)]
        pub external_ids: Vec<ExternalId>,
    }

    #[derive(Deserialize)]
    pub struct Email {
        #[serde(default)]
        pub value: String,
        #[serde(default)]
        pub primary: bool,
    }

    #[derive(Deserialize)]
    pub struct ExternalId {
        #[serde(default)]
        pub issuer: String,
        #[serde(default)]
        pub id: String,
    }

    #[derive(Deserialize)]
    pub struct Group {
        pub id: String,
        #[serde(rename = "displayName", default)]
        pub display_name: String,
        #[serde(rename = "externalIds", default)]
        pub external_ids: Vec<ExternalId>,
    }
}

impl From<wire::User> for DirectoryUser {
    fn from(u: wire::User) -> Self {
        Self {
            user_id: u.id,
            user_name: u.user_name,
            display_name: u.display_name,
            emails: u
                .emails
                .into_iter()
                .map(|e| EmailEntry {
                    value: e.value,
                    primary: e.primary,
                })
                .collect(),
            external_ids: u
                .external_ids
                .into_iter()
                .map(|x| ExternalId {
                    issuer: x.issuer,
                    id: x.id,
                })
                .collect(),
        }
    }
}

impl From<wire::Group> for DirectoryGroup {
    fn from(g: wire::Group) -> Self {
        Self {
            group_id: g.id,
            display_name: g.display_name,
            external_ids: g
                .external_ids
                .into_iter()
                .map(|x| ExternalId {
                    issuer: x.issuer,
                    id: x.id,
                })
                .collect(),
        }
    }
}

// ── In-memory directory ───────────────────────────────────────────

/// In-memory directory for tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: Mutex<Vec<DirectoryUser>>,
    groups: Mutex<Vec<DirectoryGroup>>,
    memberships: Mutex<Vec<(String, String)>>, // (user_id, group_id)
    fail_groups: Mutex<Vec<String>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a principal.
    pub fn add_user(&self, user: DirectoryUser) {
        self.users.lock().push(user);
    }

    /// Add a group.
    pub fn add_group(&self, group: DirectoryGroup) {
        self.groups.lock().push(group);
    }

    /// Make a principal a member of a group.
    pub fn add_membership(&self, user_id: &str, group_id: &str) {
        self.memberships
            .lock()
            .push((user_id.to_string(), group_id.to_string()));
    }

    /// Make `describe_group` fail for one group id.
    pub fn fail_group(&self, group_id: &str) {
        self.fail_groups.lock().push(group_id.to_string());
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn find_user_id(
        &self,
        attribute: &str,
        value: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let users = self.users.lock();
        let found = match attribute {
            "userName" => users.iter().find(|u| u.user_name.eq_ignore_ascii_case(value)),
            "emails.value" => users
                .iter()
                .find(|u| u.emails.iter().any(|e| e.value.eq_ignore_ascii_case(value))),
            _ => None,
        };
        Ok(found.map(|u| u.user_id.clone()))
    }

    async fn describe_user(&self, user_id: &str) -> Result<DirectoryUser, DirectoryError> {
        self.users
            .lock()
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn list_group_ids(&self, user_id: &str) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .memberships
            .lock()
            .iter()
            .filter(|(uid, _)| uid == user_id)
            .map(|(_, gid)| gid.clone())
            .collect())
    }

    async fn describe_group(&self, group_id: &str) -> Result<DirectoryGroup, DirectoryError> {
        if self.fail_groups.lock().iter().any(|g| g == group_id) {
            return Err(DirectoryError::Backend("injected failure".into()));
        }
        self.groups
            .lock()
            .iter()
            .find(|g| g.group_id == group_id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> DirectoryUser {
        DirectoryUser {
            user_id: "u-1".into(),
            user_name: "alice".into(),
            display_name: "Alice Example".into(),
            emails: vec![EmailEntry {
                value: "alice@example.com".into(),
                primary: true,
            }],
            external_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_memory_find_by_username_and_email() {
        let dir = MemoryDirectory::new();
        dir.add_user(sample_user());

        assert_eq!(
            dir.find_user_id("userName", "alice").await.unwrap(),
            Some("u-1".to_string())
        );
        assert_eq!(
            dir.find_user_id("emails.value", "alice@example.com")
                .await
                .unwrap(),
            Some("u-1".to_string())
        );
        assert_eq!(dir.find_user_id("userName", "bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_memberships() {
        let dir = MemoryDirectory::new();
        dir.add_user(sample_user());
        dir.add_group(DirectoryGroup {
            group_id: "g-1".into(),
            display_name: "vpn-staff".into(),
            external_ids: vec![],
        });
        dir.add_membership("u-1", "g-1");

        assert_eq!(dir.list_group_ids("u-1").await.unwrap(), vec!["g-1"]);
        assert_eq!(
            dir.describe_group("g-1").await.unwrap().display_name,
            "vpn-staff"
        );
    }

    #[tokio::test]
    async fn test_memory_injected_group_failure() {
        let dir = MemoryDirectory::new();
        dir.add_group(DirectoryGroup {
            group_id: "g-1".into(),
            display_name: "vpn-staff".into(),
            external_ids: vec![],
        });
        dir.fail_group("g-1");
        assert!(dir.describe_group("g-1").await.is_err());
    }
}
