//! Credential store over an object store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use swanportal_adapters::{LogSink, ObjectStore, VpnUser};
use swanportal_cache::TtlCache;
use swanportal_envelope::KeyRing;

use crate::nthash::nt_hash;

/// Lifetime of the read-through cache.
const READ_CACHE_TTL: Duration = Duration::from_secs(15);
/// Credentials unused for longer than this are dropped on read.
const ACCESS_EXPIRY_SECS: i64 = 15 * 24 * 60 * 60;
/// At most this many IP entries are retained per user.
const MAX_IP_ENTRIES: usize = 4;

/// Persisted per-user credential record.
///
/// Serialized (inside the envelope) as
/// `{"username", "nt_passwords", "access_times"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Owning user; must equal the identity the object key was derived
    /// from.
    pub username: String,
    /// `client-IP → NT-hash` (32 upper-case hex chars).
    pub nt_passwords: HashMap<String, String>,
    /// `client-IP → Unix seconds of last use`.
    #[serde(default)]
    pub access_times: HashMap<String, i64>,
}

impl UserCredentials {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }

    /// Apply the retention invariants in place.
    ///
    /// 1. Access entries without a matching password are dropped.
    /// 2. Entries last used before `now - 15 days` are dropped from both
    ///    maps.
    /// 3. At most four entries survive; the ones with the smallest access
    ///    times go first. A password without any access time counts as
    ///    oldest.
    fn normalize(&mut self, now: i64) {
        self.access_times
            .retain(|ip, _| self.nt_passwords.contains_key(ip));

        let expires_before = now - ACCESS_EXPIRY_SECS;
        let expired: Vec<String> = self
            .access_times
            .iter()
            .filter(|(_, &at)| at < expires_before)
            .map(|(ip, _)| ip.clone())
            .collect();
        for ip in expired {
            self.nt_passwords.remove(&ip);
            self.access_times.remove(&ip);
        }

        if self.nt_passwords.len() > MAX_IP_ENTRIES {
            let mut ranked: Vec<(String, i64)> = self
                .nt_passwords
                .keys()
                .map(|ip| (ip.clone(), self.access_times.get(ip).copied().unwrap_or(0)))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (ip, _) in ranked.drain(MAX_IP_ENTRIES..) {
                self.nt_passwords.remove(&ip);
                self.access_times.remove(&ip);
            }
        }
    }
}

/// Object key for a user's credential record.
pub fn object_key(username: &str) -> String {
    let digest = Sha512::digest(username.as_bytes());
    format!("{}.bin", hex::encode(digest))
}

/// Credential store: envelope-encrypted records in an object store behind
/// a 15-second read cache.
///
/// Every remote failure surfaces as absence; callers cannot distinguish
/// "no credential" from "store unreachable", which keeps the RADIUS reply
/// path free of error-shaped side channels.
pub struct CredentialStore {
    objects: Arc<dyn ObjectStore>,
    keys: KeyRing,
    log: Arc<dyn LogSink>,
    bucket: String,
    cache: TtlCache<String, UserCredentials>,
}

impl CredentialStore {
    /// Create a store over `objects`, sealing with `keys`.
    ///
    /// `bucket` is only log context identifying the backing location.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        keys: KeyRing,
        log: Arc<dyn LogSink>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            keys,
            log,
            bucket: bucket.into(),
            cache: TtlCache::new(READ_CACHE_TTL),
        }
    }

    /// IPs for which a password is currently stored.
    pub async fn list_ips(&self, user: &VpnUser) -> Vec<String> {
        let key = object_key(&user.username);
        let Some(credentials) = self.get_credentials(&key, &user.username).await else {
            return Vec::new();
        };

        let mut ips: Vec<String> = credentials.nt_passwords.keys().cloned().collect();
        ips.sort();

        self.log
            .debug("Select IP addresses", &[("username", &user.username)]);

        ips
    }

    /// Stored NT-hash for `(user, ip)`, recording the access.
    ///
    /// Returns `None` when no credential is stored (or the store is
    /// unreachable). On a hit the access time is refreshed and persisted
    /// best-effort.
    pub async fn get_nt_hash(&self, user: &VpnUser, ip: &str) -> Option<String> {
        let key = object_key(&user.username);
        let mut credentials = self.get_credentials(&key, &user.username).await?;

        let hash = credentials.nt_passwords.get(ip).cloned()?;

        self.log.debug(
            "Select NT password",
            &[("username", &user.username), ("ipAddress", ip)],
        );

        credentials.access_times.insert(ip.to_string(), unix_now());
        self.put_credentials(&key, &user.username, credentials).await;

        Some(hash)
    }

    /// Store a fresh password for `(user, ip)`.
    ///
    /// Computes the NT-hash of `cleartext`, records the access time, and
    /// persists. Failures are logged and swallowed; the caller observes
    /// them on the next read.
    pub async fn set_password(&self, user: &VpnUser, ip: &str, cleartext: &str) {
        let key = object_key(&user.username);
        let mut credentials = self
            .get_credentials(&key, &user.username)
            .await
            .unwrap_or_else(|| UserCredentials::new(&user.username));

        if credentials.username != user.username {
            self.log.error(
                "Username mismatch",
                &[
                    ("credentialsUsername", &credentials.username),
                    ("vpnUserUsername", &user.username),
                ],
            );
            return;
        }

        credentials
            .nt_passwords
            .insert(ip.to_string(), nt_hash(cleartext));
        credentials.access_times.insert(ip.to_string(), unix_now());

        if self.put_credentials(&key, &user.username, credentials).await {
            self.log.debug(
                "Update NT password",
                &[("username", &user.username), ("ipAddress", ip)],
            );
        }
    }

    /// Read path: cache → fetch → open → decode → normalize → cache.
    ///
    /// Any failure returns `None` without touching the cache. The envelope
    /// is opened with a zero TTL: the object store is the source of truth
    /// and records may legitimately be older than any token lifetime.
    async fn get_credentials(&self, key: &str, username: &str) -> Option<UserCredentials> {
        if let Some(mut cached) = self.cache.get(&key.to_string()) {
            // The retention invariants hold for cached reads too; a write
            // may have pushed the record past the cap moments ago.
            cached.normalize(unix_now());
            return Some(cached);
        }

        let body = match self.objects.get(key).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                self.log.error(
                    "Failed to get credentials object",
                    &[
                        ("err", &e.to_string()),
                        ("bucket", &self.bucket),
                        ("objectKey", key),
                        ("username", username),
                    ],
                );
                return None;
            }
        };

        let cleartext = match self.keys.open(&body, Duration::ZERO) {
            Ok(cleartext) => cleartext,
            Err(e) => {
                self.log.error(
                    "Failed to decrypt credentials",
                    &[
                        ("err", &e.to_string()),
                        ("bucket", &self.bucket),
                        ("objectKey", key),
                        ("username", username),
                    ],
                );
                return None;
            }
        };

        let mut credentials: UserCredentials = match serde_json::from_slice(&cleartext) {
            Ok(credentials) => credentials,
            Err(e) => {
                self.log.error(
                    "Failed to decode credentials",
                    &[
                        ("err", &e.to_string()),
                        ("bucket", &self.bucket),
                        ("objectKey", key),
                        ("username", username),
                    ],
                );
                return None;
            }
        };

        if credentials.username != username {
            self.log.error(
                "Username mismatch",
                &[
                    ("credentialsUsername", &credentials.username),
                    ("vpnUserUsername", username),
                    ("objectKey", key),
                ],
            );
            return None;
        }

        credentials.normalize(unix_now());
        self.cache.insert(key.to_string(), credentials.clone());

        Some(credentials)
    }

    /// Write path: strip orphan access entries, seal, upload with tags,
    /// refresh the cache. Returns whether the upload succeeded.
    async fn put_credentials(
        &self,
        key: &str,
        username: &str,
        mut credentials: UserCredentials,
    ) -> bool {
        credentials
            .access_times
            .retain(|ip, _| credentials.nt_passwords.contains_key(ip));

        let encoded = match serde_json::to_vec(&credentials) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.log
                    .error("Failed to encode credentials", &[("err", &e.to_string())]);
                return false;
            }
        };
        let sealed = self.keys.seal(&encoded);

        let mut tags: Vec<(String, String)> =
            vec![("Username".to_string(), credentials.username.clone())];
        let mut timed: Vec<(&String, &i64)> = credentials.access_times.iter().collect();
        timed.sort_by_key(|(ip, _)| ip.as_str());
        for (ip, at) in timed {
            tags.push((ip.clone(), at.to_string()));
        }

        if let Err(e) = self.objects.put(key, sealed, &tags).await {
            self.log.error(
                "Failed to put credentials object",
                &[
                    ("err", &e.to_string()),
                    ("bucket", &self.bucket),
                    ("objectKey", key),
                    ("username", username),
                ],
            );
            return false;
        }

        self.cache.insert(key.to_string(), credentials);
        true
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use swanportal_adapters::{MemoryLogSink, MemoryObjectStore};

    fn user(name: &str) -> VpnUser {
        VpnUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            class: "staff".into(),
        }
    }

    fn make_store() -> (Arc<MemoryObjectStore>, KeyRing, CredentialStore) {
        let objects = Arc::new(MemoryObjectStore::new());
        let keys = KeyRing::ephemeral();
        let store = CredentialStore::new(
            objects.clone(),
            keys.clone(),
            Arc::new(MemoryLogSink::new()),
            "test-bucket",
        );
        (objects, keys, store)
    }

    /// Seal a raw record directly into the object store, bypassing the
    /// public API, to shape timestamps.
    async fn inject(
        objects: &MemoryObjectStore,
        keys: &KeyRing,
        credentials: &UserCredentials,
    ) {
        let key = object_key(&credentials.username);
        let sealed = keys.seal(&serde_json::to_vec(credentials).unwrap());
        objects.put(&key, sealed, &[]).await.unwrap();
    }

    #[test]
    fn test_object_key_shape() {
        let key = object_key("alice");
        assert!(key.ends_with(".bin"));
        assert_eq!(key.len(), 128 + 4);
        assert_ne!(object_key("alice"), object_key("bob"));
    }

    #[tokio::test]
    async fn test_set_then_get_returns_nt_hash() {
        let (_, _, store) = make_store();
        let alice = user("alice");

        store.set_password(&alice, "203.0.113.7", "S3cr3t!pass").await;

        let hash = store.get_nt_hash(&alice, "203.0.113.7").await;
        assert_eq!(hash, Some(nt_hash("S3cr3t!pass")));
        assert_eq!(store.get_nt_hash(&alice, "198.51.100.1").await, None);
    }

    #[tokio::test]
    async fn test_list_ips() {
        let (_, _, store) = make_store();
        let alice = user("alice");

        assert!(store.list_ips(&alice).await.is_empty());

        store.set_password(&alice, "203.0.113.7", "pw1").await;
        store.set_password(&alice, "198.51.100.1", "pw2").await;

        assert_eq!(
            store.list_ips(&alice).await,
            vec!["198.51.100.1".to_string(), "203.0.113.7".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cap_keeps_four_most_recent() {
        let (objects, keys, store) = make_store();
        let now = unix_now();

        let mut credentials = UserCredentials::new("alice");
        for i in 0..5i64 {
            let ip = format!("203.0.113.{i}");
            credentials.nt_passwords.insert(ip.clone(), nt_hash("pw"));
            credentials.access_times.insert(ip, now - 500 + i * 100);
        }
        inject(&objects, &keys, &credentials).await;

        let ips = store.list_ips(&user("alice")).await;
        assert_eq!(ips.len(), 4);
        // The oldest entry (.0) is evicted.
        assert!(!ips.contains(&"203.0.113.0".to_string()));
    }

    #[tokio::test]
    async fn test_expired_access_dropped_from_both_maps() {
        let (objects, keys, store) = make_store();
        let now = unix_now();

        let mut credentials = UserCredentials::new("alice");
        credentials
            .nt_passwords
            .insert("203.0.113.7".into(), nt_hash("fresh"));
        credentials
            .access_times
            .insert("203.0.113.7".into(), now - 60);
        credentials
            .nt_passwords
            .insert("198.51.100.1".into(), nt_hash("stale"));
        credentials
            .access_times
            .insert("198.51.100.1".into(), now - 20 * 24 * 60 * 60);
        inject(&objects, &keys, &credentials).await;

        let alice = user("alice");
        assert_eq!(store.list_ips(&alice).await, vec!["203.0.113.7".to_string()]);
        assert_eq!(store.get_nt_hash(&alice, "198.51.100.1").await, None);
    }

    #[tokio::test]
    async fn test_orphan_access_entry_discarded() {
        let (objects, keys, store) = make_store();
        let now = unix_now();

        let mut credentials = UserCredentials::new("alice");
        credentials
            .nt_passwords
            .insert("203.0.113.7".into(), nt_hash("pw"));
        credentials.access_times.insert("203.0.113.7".into(), now);
        // Access entry without a matching password.
        credentials.access_times.insert("198.51.100.1".into(), now);
        inject(&objects, &keys, &credentials).await;

        let alice = user("alice");
        store.set_password(&alice, "203.0.113.9", "pw2").await;

        // The persisted tags reflect the normalized record: the orphan IP
        // never reappears.
        let tags = objects.tags(&object_key("alice")).unwrap();
        assert!(tags.iter().any(|(k, _)| k == "Username"));
        assert!(tags.iter().any(|(k, _)| k == "203.0.113.7"));
        assert!(tags.iter().any(|(k, _)| k == "203.0.113.9"));
        assert!(!tags.iter().any(|(k, _)| k == "198.51.100.1"));
    }

    #[tokio::test]
    async fn test_username_mismatch_is_absence() {
        let (objects, keys, store) = make_store();

        let mut credentials = UserCredentials::new("mallory");
        credentials
            .nt_passwords
            .insert("203.0.113.7".into(), nt_hash("pw"));
        credentials
            .access_times
            .insert("203.0.113.7".into(), unix_now());
        // Stored under alice's key but claiming another owner.
        let sealed = keys.seal(&serde_json::to_vec(&credentials).unwrap());
        objects.put(&object_key("alice"), sealed, &[]).await.unwrap();

        assert!(store.list_ips(&user("alice")).await.is_empty());
        assert_eq!(store.get_nt_hash(&user("alice"), "203.0.113.7").await, None);
    }

    #[tokio::test]
    async fn test_store_failure_returns_empty() {
        let (objects, _, store) = make_store();
        objects.fail_next();
        assert!(store.list_ips(&user("alice")).await.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_object_is_absence() {
        let (objects, _, store) = make_store();
        objects
            .put(&object_key("alice"), b"not an envelope".to_vec(), &[])
            .await
            .unwrap();
        assert!(store.list_ips(&user("alice")).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_cache_absorbs_backend_outage() {
        let (objects, _, store) = make_store();
        let alice = user("alice");

        store.set_password(&alice, "203.0.113.7", "pw").await;
        assert_eq!(store.list_ips(&alice).await.len(), 1);

        // Within the cache window the backend is not consulted at all.
        objects.fail_next();
        assert_eq!(store.list_ips(&alice).await.len(), 1);
    }

    #[test]
    fn test_normalize_unstamped_password_is_oldest() {
        let now = unix_now();
        let mut credentials = UserCredentials::new("alice");
        for i in 0..4i64 {
            let ip = format!("203.0.113.{i}");
            credentials.nt_passwords.insert(ip.clone(), nt_hash("pw"));
            credentials.access_times.insert(ip, now - i);
        }
        // Fifth entry has a password but no access time.
        credentials
            .nt_passwords
            .insert("198.51.100.1".into(), nt_hash("pw"));

        credentials.normalize(now);

        assert_eq!(credentials.nt_passwords.len(), 4);
        assert!(!credentials.nt_passwords.contains_key("198.51.100.1"));
    }
}
