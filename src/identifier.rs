//! Identifier derivation and comparison (spec §4.3).
//!
//! `nameID`, `issuerID`, `certID` and `keyID` are all 20-byte SHA-1
//! digests. They exist so a certificate store can be indexed and queried
//! without the store ever having to parse a certificate itself — the
//! lookup key is computed once by the engine and handed to the store as
//! an opaque blob.

use sha1::{Digest, Sha1};

use crate::asn1::stream::ByteWriter;

/// Fixed size of every identifier this module produces.
pub const IDENTIFIER_SIZE: usize = 20;

/// A 20-byte SHA-1-derived identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier(pub [u8; IDENTIFIER_SIZE]);

impl Identifier {
    /// Build from a digest already known to be 20 bytes.
    pub fn from_digest(digest: [u8; IDENTIFIER_SIZE]) -> Self {
        Self(digest)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// `nameID = SHA1(DN-as-encoded)`: identifies a subject or issuer DN for
/// cert-store lookup.
pub fn name_id(der_encoded_dn: &[u8]) -> Identifier {
    Identifier(sha1_digest(der_encoded_dn))
}

/// `certID = nameID` of the subject; kept as a distinct name for call-site
/// clarity even though it's the same derivation.
pub fn cert_id(der_encoded_subject_dn: &[u8]) -> Identifier {
    name_id(der_encoded_subject_dn)
}

/// `issuerID = SHA1(SEQUENCE { issuerDN, serialNumber-as-INTEGER })`.
/// `serial` is the serial number's big-endian magnitude bytes, encoded
/// here as a DER `INTEGER`.
pub fn issuer_id(der_encoded_issuer_dn: &[u8], serial: &[u8]) -> Identifier {
    let mut w = ByteWriter::new();
    let mut body = ByteWriter::new();
    body.push_raw(der_encoded_issuer_dn);
    body.write_bignum(serial);
    let body_bytes = body.into_bytes();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    Identifier(sha1_digest(&w.into_bytes()))
}

/// `keyID`: derived straight from the SPKI bytes (the full
/// `SubjectPublicKeyInfo` encoding, matching how the issuing CA computed
/// its own `subjectKeyIdentifier`).
pub fn key_id(spki_der: &[u8]) -> Identifier {
    Identifier(sha1_digest(spki_der))
}

fn sha1_digest(data: &[u8]) -> [u8; IDENTIFIER_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; IDENTIFIER_SIZE];
    out.copy_from_slice(&result);
    out
}

/// Compare two serial numbers (big-endian magnitude bytes) the way
/// issuerID derivation needs to: tolerant of a single leading `0x00`
/// padding byte on either side, but only when the following byte's high
/// bit is clear (a "real" leading zero forced by DER's sign-bit rule, not
/// an actual magnitude difference).
pub fn serials_equivalent(a: &[u8], b: &[u8]) -> bool {
    fn strip_padding(s: &[u8]) -> &[u8] {
        if s.len() > 1 && s[0] == 0x00 && s[1] & 0x80 == 0 {
            &s[1..]
        } else {
            s
        }
    }
    strip_padding(a) == strip_padding(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_id_is_deterministic_sha1() {
        let dn = b"fake-der-encoded-dn";
        let a = name_id(dn);
        let b = name_id(dn);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), IDENTIFIER_SIZE);
    }

    #[test]
    fn cert_id_matches_name_id_of_subject() {
        let subject = b"subject-dn-bytes";
        assert_eq!(cert_id(subject), name_id(subject));
    }

    #[test]
    fn issuer_id_changes_with_serial() {
        let dn = b"issuer-dn-bytes";
        let a = issuer_id(dn, &[0x01]);
        let b = issuer_id(dn, &[0x02]);
        assert_ne!(a, b);
    }

    #[test]
    fn serial_comparison_tolerates_single_leading_zero() {
        assert!(serials_equivalent(&[0x00, 0xAB], &[0xAB]));
        assert!(serials_equivalent(&[0xAB], &[0x00, 0xAB]));
    }

    #[test]
    fn serial_comparison_rejects_leading_zero_when_high_bit_set() {
        // 0x00 0xFF is NOT equivalent to 0xFF: the leading zero there is a
        // real magnitude-preserving DER sign-bit pad, not spurious padding,
        // so stripping it would change the value's sign.
        assert!(!serials_equivalent(&[0x00, 0xFF], &[0xFF]));
    }

    #[test]
    fn serial_comparison_distinguishes_real_differences() {
        assert!(!serials_equivalent(&[0x01, 0xAB], &[0xAB]));
    }
}
