//! `CertStore` and the PKI-user record (spec §2, §3 "PKI User Record").
//!
//! The store is treated as a black-box oracle: it's indexed only by the
//! 20-byte identifiers [`crate::identifier`] produces, never by a
//! certificate it has to parse itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::cert::CertObject;
use crate::error::{CoreError, Result};
use crate::identifier::Identifier;

/// `{userID, issuePassword, profile-constraints}` held in the CertStore
/// (spec §3). Password comparison is by-bytes after optional decode of
/// the base32 presentation form.
pub struct PkiUserRecord {
    /// The transaction-ID / lookup key this record answers to.
    pub user_id: String,
    /// The shared secret the client must present as `challengePassword`.
    pub issue_password: SecretString,
    /// If set, the subject CN the issued certificate must use (profile
    /// constraint: the request's own CN is overridden).
    pub fixed_common_name: Option<String>,
}

impl PkiUserRecord {
    /// Compare a presented password to this record's `issuePassword`.
    /// `presented` may be in cryptlib base32 presentation form; it's
    /// decoded first if it looks like one (length 17, matching alphabet),
    /// otherwise compared as raw bytes.
    pub fn password_matches(&self, presented: &str) -> bool {
        let candidate = if presented.len() == 17 && is_presentation_form(presented) {
            match decode_presentation_form(presented) {
                Ok(bytes) => return bytes == self.issue_password.expose_secret().as_bytes(),
                Err(_) => presented.to_string(),
            }
        } else {
            presented.to_string()
        };
        candidate.as_bytes() == self.issue_password.expose_secret().as_bytes()
    }
}

/// The 31-character alphabet used by the PKI-user presentation form:
/// `0/1/O/I` are excluded as visually confusable.
const PRESENTATION_ALPHABET: &[u8; 31] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

fn is_presentation_form(s: &str) -> bool {
    let stripped: String = s.chars().filter(|c| *c != '-').collect();
    stripped.len() == 13 && stripped.bytes().all(|b| PRESENTATION_ALPHABET.contains(&b))
        && s.len() == 17
}

/// Encode `payload` (up to 8 bytes, ~80 bits with the embedded checksum
/// byte) into the grouped `XXXX-XXXX-XXXX-X` presentation form.
pub fn encode_presentation_form(payload: &[u8]) -> String {
    let checksum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    let mut all_bytes = payload.to_vec();
    all_bytes.push(checksum);

    let mut bits: Vec<u8> = Vec::new();
    for byte in &all_bytes {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }
    // Pad to a multiple of 5 bits for base32-style grouping.
    while bits.len() % 5 != 0 {
        bits.push(0);
    }

    let mut chars = String::new();
    for chunk in bits.chunks(5) {
        let mut value = 0u8;
        for &bit in chunk {
            value = (value << 1) | bit;
        }
        chars.push(PRESENTATION_ALPHABET[value as usize % PRESENTATION_ALPHABET.len()] as char);
    }
    chars.truncate(13);

    let grouped: Vec<String> = chars.as_bytes().chunks(4).map(|c| String::from_utf8_lossy(c).to_string()).collect();
    grouped.join("-")
}

/// Decode a grouped presentation-form string back to raw bytes,
/// verifying the trailing checksum character. Returns `BadData` if the
/// alphabet or checksum don't check out.
pub fn decode_presentation_form(s: &str) -> Result<Vec<u8>> {
    let stripped: String = s.chars().filter(|c| *c != '-').collect();
    if stripped.len() != 13 {
        return Err(CoreError::bad_data("presentation form must decode to 13 characters"));
    }
    let mut bits: Vec<u8> = Vec::new();
    for c in stripped.bytes() {
        let idx = PRESENTATION_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| CoreError::bad_data("character outside presentation-form alphabet"))?;
        for i in (0..5).rev() {
            bits.push(((idx as u8) >> i) & 1);
        }
    }
    bits.truncate((bits.len() / 8) * 8);
    let mut bytes = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks(8) {
        let mut value = 0u8;
        for &bit in chunk {
            value = (value << 1) | bit;
        }
        bytes.push(value);
    }
    if bytes.len() < 2 {
        return Err(CoreError::bad_data("presentation form decodes to too few bytes"));
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 1);
    let expected = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if checksum[0] != expected {
        return Err(CoreError::bad_data("presentation form checksum mismatch"));
    }
    Ok(payload.to_vec())
}

/// Stateless-looking store interface (spec §2): insert, lookup by
/// identifier, update. Implementations may be backed by anything; the
/// core only ever calls through this trait.
#[async_trait]
pub trait CertStore: Send + Sync {
    /// Insert a signed certificate, indexed by its `certID`.
    async fn insert(&self, id: Identifier, cert: CertObject) -> Result<()>;

    /// Look up a certificate by `certID`/`nameID`/`issuerID`.
    async fn lookup(&self, id: Identifier) -> Result<Option<Arc<CertObject>>>;

    /// Update an existing entry in place (e.g. to flip a revocation
    /// flag); fails with `NotFound` if absent.
    async fn update(&self, id: Identifier, cert: CertObject) -> Result<()>;

    /// Find a PKI-user record by its `userID` (the SCEP transaction ID).
    async fn find_pki_user(&self, user_id: &str) -> Result<Option<PkiUserRecord>>;
}

/// A simple in-process `CertStore`, sufficient for tests and for a
/// single-node deployment that doesn't need external persistence.
#[derive(Default)]
pub struct InMemoryCertStore {
    certs: std::sync::RwLock<HashMap<[u8; 20], Arc<CertObject>>>,
    pki_users: std::sync::RwLock<HashMap<String, PkiUserRecordData>>,
}

struct PkiUserRecordData {
    issue_password: String,
    fixed_common_name: Option<String>,
}

impl InMemoryCertStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a PKI-user record for SCEP authentication.
    pub fn register_pki_user(&self, user_id: &str, issue_password: &str, fixed_common_name: Option<&str>) {
        self.pki_users.write().unwrap().insert(
            user_id.to_string(),
            PkiUserRecordData {
                issue_password: issue_password.to_string(),
                fixed_common_name: fixed_common_name.map(str::to_string),
            },
        );
    }
}

#[async_trait]
impl CertStore for InMemoryCertStore {
    async fn insert(&self, id: Identifier, cert: CertObject) -> Result<()> {
        let mut certs = self.certs.write().unwrap();
        if certs.contains_key(id.as_bytes()) {
            return Err(CoreError::Duplicate(format!("certificate {id} already present")));
        }
        certs.insert(*id.as_bytes(), Arc::new(cert));
        Ok(())
    }

    async fn lookup(&self, id: Identifier) -> Result<Option<Arc<CertObject>>> {
        let certs = self.certs.read().unwrap();
        Ok(certs.get(id.as_bytes()).cloned())
    }

    async fn update(&self, id: Identifier, cert: CertObject) -> Result<()> {
        let mut certs = self.certs.write().unwrap();
        if !certs.contains_key(id.as_bytes()) {
            return Err(CoreError::NotFound(format!("certificate {id} not found")));
        }
        certs.insert(*id.as_bytes(), Arc::new(cert));
        Ok(())
    }

    async fn find_pki_user(&self, user_id: &str) -> Result<Option<PkiUserRecord>> {
        let users = self.pki_users.read().unwrap();
        Ok(users.get(user_id).map(|data| PkiUserRecord {
            user_id: user_id.to_string(),
            issue_password: SecretString::from(data.issue_password.clone()),
            fixed_common_name: data.fixed_common_name.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_form_round_trips() {
        let payload = [0xDEu8, 0xAD, 0xBE, 0xEF];
        let encoded = encode_presentation_form(&payload);
        assert_eq!(encoded.len(), 17);
        let decoded = decode_presentation_form(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn presentation_form_rejects_bad_checksum() {
        let payload = [0x01u8, 0x02];
        let mut encoded = encode_presentation_form(&payload);
        // Flip the final character to corrupt the checksum.
        let last = encoded.pop().unwrap();
        let replacement = if last == 'Z' { 'Y' } else { 'Z' };
        encoded.push(replacement);
        assert!(decode_presentation_form(&encoded).is_err());
    }

    #[tokio::test]
    async fn pki_user_lookup_round_trips() {
        let store = InMemoryCertStore::new();
        store.register_pki_user("AAAA-AAAA-AAAA-A", "AAAA-AAAA-AAAA-A", Some("test"));
        let user = store.find_pki_user("AAAA-AAAA-AAAA-A").await.unwrap().unwrap();
        assert!(user.password_matches("AAAA-AAAA-AAAA-A"));
        assert!(!user.password_matches("wrong"));
    }

    #[tokio::test]
    async fn cert_lookup_returns_the_inserted_certificate() {
        use crate::cert::{CertKind, CertObject};

        let store = InMemoryCertStore::new();
        let id = Identifier::from_digest([7u8; 20]);
        let mut cert = CertObject::new(CertKind::Cert);
        cert.set_serial(vec![0x01, 0x02, 0x03], 32).unwrap();
        store.insert(id, cert).await.unwrap();

        let found = store.lookup(id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().serial(), Some([0x01, 0x02, 0x03].as_slice()));

        let missing = store.lookup(Identifier::from_digest([9u8; 20])).await.unwrap();
        assert!(missing.is_none());
    }
}
