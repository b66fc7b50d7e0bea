//! Bounded TTL caches for derived signing keys and credential lookups.
//!
//! Both maps flush entirely on overflow instead of tracking eviction order:
//! amortised O(1) and no bookkeeping. Derived key bytes live in `Zeroizing`
//! wrappers so a flush (or process exit) scrubs them; the cache key itself
//! is a SHA-256 digest of the inputs, so the secret never sits in the map.

use crate::types::Credential;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Derived signing keys live for a day; they are only valid for one
/// credential-scope date anyway.
const SIGNING_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Credentials refresh quickly so a deactivated key stops verifying
/// within a minute.
const CREDENTIAL_TTL: Duration = Duration::from_secs(60);

/// Entry cap per map; overflow flushes the whole map.
const MAX_ENTRIES: usize = 1000;

struct SigningKeyEntry {
    key: Zeroizing<[u8; 32]>,
    expires_at: Instant,
}

struct CredentialEntry {
    credential: Credential,
    expires_at: Instant,
}

/// Shared cache consulted by the SigV4 verifier on every request.
pub struct AuthCache {
    signing_keys: RwLock<HashMap<[u8; 32], SigningKeyEntry>>,
    credentials: RwLock<HashMap<String, CredentialEntry>>,
}

impl Default for AuthCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthCache {
    pub fn new() -> Self {
        Self {
            signing_keys: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Digest of `(secret, date, region, service)` used as the map key, so
    /// the secret bytes themselves are never stored.
    fn signing_key_id(secret: &str, date: &str, region: &str, service: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for field in [secret, date, region, service] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.finalize().into()
    }

    pub fn get_signing_key(
        &self,
        secret: &str,
        date: &str,
        region: &str,
        service: &str,
    ) -> Option<Zeroizing<[u8; 32]>> {
        let id = Self::signing_key_id(secret, date, region, service);
        let map = self.signing_keys.read();
        let entry = map.get(&id)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.key.clone())
    }

    pub fn put_signing_key(
        &self,
        secret: &str,
        date: &str,
        region: &str,
        service: &str,
        key: Zeroizing<[u8; 32]>,
    ) {
        let id = Self::signing_key_id(secret, date, region, service);
        let mut map = self.signing_keys.write();
        if map.len() >= MAX_ENTRIES {
            map.clear();
        }
        map.insert(
            id,
            SigningKeyEntry {
                key,
                expires_at: Instant::now() + SIGNING_KEY_TTL,
            },
        );
    }

    pub fn get_credential(&self, access_key_id: &str) -> Option<Credential> {
        let map = self.credentials.read();
        let entry = map.get(access_key_id)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.credential.clone())
    }

    /// Cache a successful lookup. Failed lookups are never cached so a
    /// freshly created credential works immediately.
    pub fn put_credential(&self, access_key_id: &str, credential: Credential) {
        let mut map = self.credentials.write();
        if map.len() >= MAX_ENTRIES {
            map.clear();
        }
        map.insert(
            access_key_id.to_string(),
            CredentialEntry {
                credential,
                expires_at: Instant::now() + CREDENTIAL_TTL,
            },
        );
    }

}
