//! Directory principal resolution.
//!
//! Resolves a login name (or email address) to a [`VpnUser`] through the
//! directory capability, deriving the RADIUS reply class from group
//! display names. Every sub-lookup sits behind its own five-minute TTL
//! cache so a burst of RADIUS authorizations costs one directory round
//! trip per principal, not one per request.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use swanportal_adapters::{DirectoryClient, DirectoryGroup, DirectoryUser, LogSink, VpnUser};
use swanportal_cache::TtlCache;

/// Lifetime of every resolver cache layer.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Issuer prefix identifying SCIM-provisioned external ids.
const SCIM_ISSUER_PREFIX: &str = "https://scim.aws.com/";

/// Alternate identifier attributes tried in order when looking up a
/// principal id.
const LOOKUP_ATTRIBUTES: [&str; 2] = ["userName", "emails.value"];

/// Resolves login names to [`VpnUser`] views.
pub struct IdentityResolver {
    directory: Arc<dyn DirectoryClient>,
    log: Arc<dyn LogSink>,
    class_pattern: Regex,

    user_id_cache: TtlCache<String, String>,
    user_cache: TtlCache<String, DirectoryUser>,
    membership_cache: TtlCache<String, Vec<String>>,
    group_cache: TtlCache<String, DirectoryGroup>,
    vpn_user_cache: TtlCache<String, VpnUser>,
}

impl IdentityResolver {
    /// Create a resolver.
    ///
    /// `class_pattern` is applied to each group display name in membership
    /// order; the first capture group of the first match becomes the
    /// user's RADIUS class.
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        log: Arc<dyn LogSink>,
        class_pattern: Regex,
    ) -> Self {
        Self {
            directory,
            log,
            class_pattern,
            user_id_cache: TtlCache::new(CACHE_TTL),
            user_cache: TtlCache::new(CACHE_TTL),
            membership_cache: TtlCache::new(CACHE_TTL),
            group_cache: TtlCache::new(CACHE_TTL),
            vpn_user_cache: TtlCache::new(CACHE_TTL),
        }
    }

    /// Resolve a login name or email address to a [`VpnUser`].
    ///
    /// Returns `None` when the principal does not exist or a required
    /// lookup fails; individual group fetch failures are logged and
    /// tolerated.
    pub async fn resolve_user(&self, username: &str) -> Option<VpnUser> {
        let username = username.to_lowercase();

        if let Some(cached) = self.vpn_user_cache.get(&username) {
            return Some(cached);
        }

        let user_id = self.select_user_id(&username).await?;
        let user = self.select_user(&user_id).await?;
        let group_ids = self.select_group_ids(&user_id).await?;

        let mut groups = Vec::with_capacity(group_ids.len());
        for group_id in &group_ids {
            if let Some(group) = self.select_group(group_id).await {
                groups.push(group);
            }
        }

        let class = self.derive_class(&groups);
        let email = primary_email(&user)
            // Principals without a primary address fall back to the login
            // name so self-service mail still has a recipient.
            .unwrap_or(&user.user_name)
            .to_string();

        let vpn_user = VpnUser {
            username: user.user_name.to_lowercase(),
            email,
            class,
        };

        self.vpn_user_cache.insert(username, vpn_user.clone());

        Some(vpn_user)
    }

    /// Principal id lookup, trying each alternate identifier attribute in
    /// order and stopping at the first success.
    async fn select_user_id(&self, username: &str) -> Option<String> {
        if let Some(cached) = self.user_id_cache.get(&username.to_string()) {
            return Some(cached);
        }

        for attribute in LOOKUP_ATTRIBUTES {
            match self.directory.find_user_id(attribute, username).await {
                Ok(Some(user_id)) => {
                    self.user_id_cache
                        .insert(username.to_string(), user_id.clone());
                    return Some(user_id);
                }
                Ok(None) => {}
                Err(e) => {
                    self.log.error(
                        "Failed to look up principal id",
                        &[
                            ("err", &e.to_string()),
                            ("attribute", attribute),
                            ("username", username),
                        ],
                    );
                }
            }
        }

        None
    }

    async fn select_user(&self, user_id: &str) -> Option<DirectoryUser> {
        if let Some(cached) = self.user_cache.get(&user_id.to_string()) {
            return Some(cached);
        }

        match self.directory.describe_user(user_id).await {
            Ok(user) => {
                self.user_cache.insert(user_id.to_string(), user.clone());
                Some(user)
            }
            Err(e) => {
                self.log.error(
                    "Failed to describe principal",
                    &[("err", &e.to_string()), ("userId", user_id)],
                );
                None
            }
        }
    }

    async fn select_group_ids(&self, user_id: &str) -> Option<Vec<String>> {
        if let Some(cached) = self.membership_cache.get(&user_id.to_string()) {
            return Some(cached);
        }

        match self.directory.list_group_ids(user_id).await {
            Ok(group_ids) => {
                self.membership_cache
                    .insert(user_id.to_string(), group_ids.clone());
                Some(group_ids)
            }
            Err(e) => {
                self.log.error(
                    "Failed to list group memberships",
                    &[("err", &e.to_string()), ("userId", user_id)],
                );
                None
            }
        }
    }

    async fn select_group(&self, group_id: &str) -> Option<DirectoryGroup> {
        if let Some(cached) = self.group_cache.get(&group_id.to_string()) {
            return Some(cached);
        }

        match self.directory.describe_group(group_id).await {
            Ok(group) => {
                self.group_cache.insert(group_id.to_string(), group.clone());
                Some(group)
            }
            Err(e) => {
                self.log.error(
                    "Failed to describe group",
                    &[("err", &e.to_string()), ("groupId", group_id)],
                );
                None
            }
        }
    }

    /// First capture of the class pattern over group display names, in
    /// membership order; the literal `"null"` when nothing matches.
    fn derive_class(&self, groups: &[DirectoryGroup]) -> String {
        for group in groups {
            if let Some(captures) = self.class_pattern.captures(&group.display_name) {
                if let Some(class) = captures.get(1) {
                    return class.as_str().to_string();
                }
            }
        }
        "null".to_string()
    }
}

/// External id carried by the SCIM provisioning system, if any.
///
/// Later entries win when several issuers match, mirroring how the
/// directory reports re-provisioned principals.
pub fn scim_external_id(user: &DirectoryUser) -> Option<&str> {
    user.external_ids
        .iter()
        .filter(|x| x.issuer.starts_with(SCIM_ISSUER_PREFIX))
        .map(|x| x.id.as_str())
        .last()
}

fn primary_email(user: &DirectoryUser) -> Option<&str> {
    user.emails
        .iter()
        .find(|e| e.primary)
        .map(|e| e.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use swanportal_adapters::{EmailEntry, ExternalId, MemoryDirectory, MemoryLogSink};

    fn resolver(directory: Arc<MemoryDirectory>) -> IdentityResolver {
        IdentityResolver::new(
            directory,
            Arc::new(MemoryLogSink::new()),
            Regex::new(r"^vpn-(\w+)$").unwrap(),
        )
    }

    fn seed_alice(directory: &MemoryDirectory) {
        directory.add_user(DirectoryUser {
            user_id: "u-1".into(),
            user_name: "Alice".into(),
            display_name: "Alice Example".into(),
            emails: vec![EmailEntry {
                value: "alice@example.com".into(),
                primary: true,
            }],
            external_ids: vec![ExternalId {
                issuer: "https://scim.aws.com/tenant".into(),
                id: "ext-1".into(),
            }],
        });
        directory.add_group(DirectoryGroup {
            group_id: "g-1".into(),
            display_name: "vpn-staff".into(),
            external_ids: vec![],
        });
        directory.add_membership("u-1", "g-1");
    }

    #[tokio::test]
    async fn test_resolves_user_with_class() {
        let directory = Arc::new(MemoryDirectory::new());
        seed_alice(&directory);
        let resolver = resolver(directory);

        let user = resolver.resolve_user("alice@example.com").await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.class, "staff");
    }

    #[tokio::test]
    async fn test_username_lookup_precedes_email() {
        let directory = Arc::new(MemoryDirectory::new());
        seed_alice(&directory);
        let resolver = resolver(directory);

        // Resolvable through either attribute; mixed case is normalized.
        let user = resolver.resolve_user("ALICE").await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_unknown_user_is_none() {
        let directory = Arc::new(MemoryDirectory::new());
        seed_alice(&directory);
        let resolver = resolver(directory);

        assert!(resolver.resolve_user("bob@example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_no_matching_group_yields_null_class() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_user(DirectoryUser {
            user_id: "u-2".into(),
            user_name: "bob".into(),
            display_name: "Bob".into(),
            emails: vec![EmailEntry {
                value: "bob@example.com".into(),
                primary: true,
            }],
            external_ids: vec![],
        });
        directory.add_group(DirectoryGroup {
            group_id: "g-2".into(),
            display_name: "finance".into(),
            external_ids: vec![],
        });
        directory.add_membership("u-2", "g-2");
        let resolver = resolver(directory);

        let user = resolver.resolve_user("bob").await.unwrap();
        assert_eq!(user.class, "null");
    }

    #[tokio::test]
    async fn test_no_primary_email_falls_back_to_username() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_user(DirectoryUser {
            user_id: "u-3".into(),
            user_name: "carol".into(),
            display_name: "Carol".into(),
            emails: vec![EmailEntry {
                value: "secondary@example.com".into(),
                primary: false,
            }],
            external_ids: vec![],
        });
        let resolver = resolver(directory);

        let user = resolver.resolve_user("carol").await.unwrap();
        assert_eq!(user.email, "carol");
    }

    #[tokio::test]
    async fn test_group_fetch_failure_tolerated() {
        let directory = Arc::new(MemoryDirectory::new());
        seed_alice(&directory);
        directory.add_group(DirectoryGroup {
            group_id: "g-broken".into(),
            display_name: "vpn-admin".into(),
            external_ids: vec![],
        });
        directory.add_membership("u-1", "g-broken");
        directory.fail_group("g-broken");
        let resolver = resolver(directory);

        // g-broken fails but g-1 still yields a class.
        let user = resolver.resolve_user("alice").await.unwrap();
        assert_eq!(user.class, "staff");
    }

    #[tokio::test]
    async fn test_cached_between_calls() {
        let directory = Arc::new(MemoryDirectory::new());
        seed_alice(&directory);
        let resolver = resolver(directory.clone());

        let first = resolver.resolve_user("alice").await.unwrap();
        // Break every subsequent group lookup; the cached view is served.
        directory.fail_group("g-1");
        let second = resolver.resolve_user("alice").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scim_external_id_filtering() {
        let user = DirectoryUser {
            user_id: "u".into(),
            user_name: "u".into(),
            display_name: "U".into(),
            emails: vec![],
            external_ids: vec![
                ExternalId {
                    issuer: "https://other.example.com/".into(),
                    id: "ignored".into(),
                },
                ExternalId {
                    issuer: "https://scim.aws.com/tenant".into(),
                    id: "ext-9".into(),
                },
            ],
        };
        assert_eq!(scim_external_id(&user), Some("ext-9"));
    }
}
