//! `SignatureEngine`: X.509-style signature creation and verification
//! (spec §4.6).
//!
//! `create_x509_signature` always emits the same outer shape —
//! `SEQUENCE { body, AlgorithmIdentifier, BIT STRING signature }` — but
//! two request formats (CRMF's `POPOSigningKey` and OCSP's
//! `BasicOCSPResponse`) want the body wrapped under an implicit context
//! tag first, and CRMF additionally wants that tag's content re-wrapped
//! in its own inner `SEQUENCE`. `WrapperSpec` carries that choice through
//! rather than duplicating the whole function three times.

use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::asn1::stream::ByteWriter;
use crate::asn1::tag;
use crate::error::{CoreError, ErrorLocus, ErrorType, Result};
use crate::identifier::{key_id, Identifier};

/// Digest algorithm used to hash the signed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    /// SHA-1 (legacy; kept for interop with older SCEP deployments).
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl HashAlgo {
    pub(crate) fn oid(self) -> &'static [u32] {
        match self {
            HashAlgo::Sha1 => &[1, 3, 14, 3, 2, 26],
            HashAlgo::Sha256 => &[2, 16, 840, 1, 101, 3, 4, 2, 1],
            HashAlgo::Sha384 => &[2, 16, 840, 1, 101, 3, 4, 2, 2],
            HashAlgo::Sha512 => &[2, 16, 840, 1, 101, 3, 4, 2, 3],
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        use sha1::Digest as Sha1Digest;
        use sha2::Digest as Sha2Digest;
        match self {
            HashAlgo::Sha1 => sha1::Sha1::digest(data).to_vec(),
            HashAlgo::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgo::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgo::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// `rsaEncryption` with PKCS#1 v1.5 padding, keyed by the digest above it.
/// The combined signature-algorithm OID (e.g. `sha256WithRSAEncryption`)
/// is what actually appears in `AlgorithmIdentifier`.
pub(crate) fn rsa_with_sha_oid(hash: HashAlgo) -> &'static [u32] {
    match hash {
        HashAlgo::Sha1 => &[1, 2, 840, 113549, 1, 1, 5],
        HashAlgo::Sha256 => &[1, 2, 840, 113549, 1, 1, 11],
        HashAlgo::Sha384 => &[1, 2, 840, 113549, 1, 1, 12],
        HashAlgo::Sha512 => &[1, 2, 840, 113549, 1, 1, 13],
    }
}

/// The signing key. Only RSA/PKCS#1v1.5 is modelled in full; this is the
/// algorithm SCEP and CRMF both assume by default.
pub enum SigningKey {
    /// An RSA private key, signed with PKCS#1 v1.5 padding.
    Rsa(Box<RsaPrivateKey>),
}

/// The corresponding public key, used for verification.
pub enum VerifyingKey {
    /// An RSA public key.
    Rsa(Box<RsaPublicKey>),
}

impl SigningKey {
    /// Derive the matching public key.
    pub fn public_key(&self) -> VerifyingKey {
        match self {
            SigningKey::Rsa(sk) => VerifyingKey::Rsa(Box::new(sk.to_public_key())),
        }
    }

    /// Borrow the underlying RSA private key, e.g. to unwrap a CMS
    /// `EnvelopedData` session key addressed to this key's identity.
    pub fn rsa_private_key(&self) -> &RsaPrivateKey {
        match self {
            SigningKey::Rsa(sk) => sk,
        }
    }

    fn sign(&self, hash: HashAlgo, digest: &[u8]) -> Result<Vec<u8>> {
        match self {
            SigningKey::Rsa(sk) => {
                let mut rng = rand::rngs::OsRng;
                macro_rules! sign_with {
                    ($digest_ty:ty) => {{
                        let signing_key = RsaSigningKey::<$digest_ty>::new((**sk).clone());
                        signing_key
                            .try_sign_with_rng(&mut rng, digest)
                            .map_err(|e| CoreError::Signature(e.to_string()))?
                            .to_vec()
                    }};
                }
                let sig = match hash {
                    HashAlgo::Sha1 => sign_with!(sha1::Sha1),
                    HashAlgo::Sha256 => sign_with!(Sha256),
                    HashAlgo::Sha384 => sign_with!(Sha384),
                    HashAlgo::Sha512 => sign_with!(Sha512),
                };
                Ok(sig)
            }
        }
    }
}

impl VerifyingKey {
    fn verify(&self, hash: HashAlgo, digest: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            VerifyingKey::Rsa(pk) => {
                macro_rules! verify_with {
                    ($digest_ty:ty) => {{
                        let verifying_key = rsa::pkcs1v15::VerifyingKey::<$digest_ty>::new((**pk).clone());
                        let sig = rsa::pkcs1v15::Signature::try_from(signature)
                            .map_err(|e| CoreError::Signature(e.to_string()))?;
                        verifying_key
                            .verify(digest, &sig)
                            .map_err(|e| CoreError::Signature(e.to_string()))
                    }};
                }
                match hash {
                    HashAlgo::Sha1 => verify_with!(sha1::Sha1),
                    HashAlgo::Sha256 => verify_with!(Sha256),
                    HashAlgo::Sha384 => verify_with!(Sha384),
                    HashAlgo::Sha512 => verify_with!(Sha512),
                }
            }
        }
    }
}

/// How the signed body is wrapped before the `AlgorithmIdentifier` and
/// signature are appended (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperSpec {
    /// No wrapping: `SEQUENCE { body, AlgorithmIdentifier, signature }`.
    Plain,
    /// Wrap `body` in `[n] IMPLICIT` before signing (used by OCSP's
    /// `tbsResponseData` tagging).
    ImplicitTag(u8),
    /// Wrap `body` in `[n] IMPLICIT SEQUENCE` (used by CRMF's
    /// `POPOSigningKey`, which re-nests the tagged content in its own
    /// inner `SEQUENCE`).
    ImplicitTagInnerSequence(u8),
}

fn apply_wrapper(body: &[u8], wrapper: WrapperSpec) -> Vec<u8> {
    match wrapper {
        WrapperSpec::Plain => body.to_vec(),
        WrapperSpec::ImplicitTag(n) => {
            let mut w = ByteWriter::new();
            w.write_tlv(tag::CLASS_CONTEXT | tag::CONSTRUCTED | n, body);
            w.into_bytes()
        }
        WrapperSpec::ImplicitTagInnerSequence(n) => {
            let mut inner = ByteWriter::new();
            inner.write_sequence_header(body.len());
            inner.push_raw(body);
            let inner_bytes = inner.into_bytes();
            let mut w = ByteWriter::new();
            w.write_tlv(tag::CLASS_CONTEXT | tag::CONSTRUCTED | n, &inner_bytes);
            w.into_bytes()
        }
    }
}

/// Build the `AlgorithmIdentifier` for an RSA/PKCS#1v1.5 signature over
/// `hash`, with a `NULL` parameters field (the conventional encoding).
pub(crate) fn write_algorithm_identifier(w: &mut ByteWriter, hash: HashAlgo) -> Result<()> {
    let mut body = ByteWriter::new();
    body.write_oid(rsa_with_sha_oid(hash))?;
    body.write_null();
    let body_bytes = body.into_bytes();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    Ok(())
}

/// Build the digest-only `AlgorithmIdentifier` (no RSA OID) used by CMS
/// `SignerInfo.digestAlgorithm`.
pub(crate) fn write_digest_algorithm_identifier(w: &mut ByteWriter, hash: HashAlgo) -> Result<()> {
    let mut body = ByteWriter::new();
    body.write_oid(hash.oid())?;
    body.write_null();
    let body_bytes = body.into_bytes();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    Ok(())
}

/// Hash `data` and sign the digest, returning the bare signature bytes
/// with no surrounding ASN.1 structure. Used by CMS `SignerInfo`, whose
/// `signature` field is a plain `OCTET STRING` rather than
/// [`create_x509_signature`]'s `Certificate`-shaped wrapper.
pub(crate) fn sign_raw_digest(
    signing_key: &SigningKey,
    hash_algo: HashAlgo,
    data: &[u8],
    side_channel_protection: bool,
) -> Result<Vec<u8>> {
    let digest = hash_algo.digest(data);
    let signature = signing_key.sign(hash_algo, &digest)?;
    if side_channel_protection {
        let verifying_key = signing_key.public_key();
        if self_check(&verifying_key, hash_algo, &digest, &signature).is_err() {
            return Err(CoreError::Failed(
                "signature self-check failed: output discarded".to_string(),
            ));
        }
    }
    Ok(signature)
}

/// Verify a bare signature produced by [`sign_raw_digest`] against
/// `verifying_key`: the counterpart used to check a CMS `SignerInfo`,
/// whose `signature` field carries no surrounding ASN.1 structure.
pub fn verify_raw_digest(
    verifying_key: &VerifyingKey,
    hash_algo: HashAlgo,
    data: &[u8],
    signature: &[u8],
) -> Result<()> {
    let digest = hash_algo.digest(data);
    verifying_key.verify(hash_algo, &digest, signature)
}

/// Create a signature over `body_bytes`, applying `wrapper_spec`, and
/// emit the full `SEQUENCE { wrapped-body, AlgorithmIdentifier,
/// BIT STRING signature }`. `extra_trailing_bytes` are appended by the
/// caller after this returns (room for an appended cert chain); this
/// function does not reserve space for them beyond returning the
/// signed object unmodified for the caller to extend.
///
/// When `side_channel_protection` is set, the signature is verified
/// against the same key immediately after creation; any mismatch
/// zeroises the output and returns `Failed` rather than returning a
/// signature that might be the product of a fault attack.
pub fn create_x509_signature(
    body_bytes: &[u8],
    signing_key: &SigningKey,
    hash_algo: HashAlgo,
    wrapper_spec: WrapperSpec,
    side_channel_protection: bool,
) -> Result<Vec<u8>> {
    let wrapped_body = apply_wrapper(body_bytes, wrapper_spec);
    let digest = hash_algo.digest(&wrapped_body);
    let mut signature = Zeroizing::new(signing_key.sign(hash_algo, &digest)?);

    if side_channel_protection {
        let verifying_key = signing_key.public_key();
        if self_check(&verifying_key, hash_algo, &digest, &signature).is_err() {
            signature.zeroize_raw();
            return Err(CoreError::Failed(
                "signature self-check failed: output discarded".to_string(),
            ));
        }
    }

    let mut alg_id = ByteWriter::new();
    write_algorithm_identifier(&mut alg_id, hash_algo)?;
    let alg_id_bytes = alg_id.into_bytes();

    let mut body = ByteWriter::new();
    body.push_raw(&wrapped_body);
    body.push_raw(&alg_id_bytes);
    body.write_bit_string(&signature);
    let body_bytes = body.into_bytes();

    let mut out = ByteWriter::new();
    out.write_sequence_header(body_bytes.len());
    out.push_raw(&body_bytes);
    Ok(out.into_bytes())
}

/// Verify a freshly-produced signature against the key that produced it.
/// Isolated from [`create_x509_signature`] so the fault-detection branch
/// can be exercised directly with a deliberately corrupted signature.
fn self_check(verifying_key: &VerifyingKey, hash: HashAlgo, digest: &[u8], signature: &[u8]) -> Result<()> {
    verifying_key.verify(hash, digest, signature)
}

trait ZeroizeRaw {
    fn zeroize_raw(&mut self);
}
impl ZeroizeRaw for Zeroizing<Vec<u8>> {
    fn zeroize_raw(&mut self) {
        use zeroize::Zeroize;
        self.as_mut_slice().zeroize();
    }
}

/// Outcome of [`verify_x509_signature`] once keyID disambiguation has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature checked out.
    Valid,
}

/// Verify a `SEQUENCE { body, AlgorithmIdentifier, BIT STRING signature }`
/// object against `verifying_key`. `expected_hash` is the digest the
/// caller expects (from the signing key's conventional algorithm); if
/// the `AlgorithmIdentifier` names a different digest, that's a
/// `Signature` failure rather than `BadData` (spec §4.6: an algorithm
/// mismatch is a verification failure, not malformed input).
///
/// `issuer_key_id`/`subject_authority_key_id`, if supplied, drive the
/// `BadData`-vs-`Signature` disambiguation fallback: when the initial
/// verification fails in a way that looks like corrupted ciphertext
/// rather than a clean reject, equal keyIDs recode the failure as
/// `BadData` and unequal keyIDs keep it as `Signature`.
pub fn verify_x509_signature(
    encoded: &[u8],
    wrapper_spec: WrapperSpec,
    verifying_key: &VerifyingKey,
    expected_hash: HashAlgo,
    issuer_key_id: Option<Identifier>,
    subject_authority_key_id: Option<Identifier>,
) -> Result<VerifyOutcome> {
    use crate::asn1::stream::ByteStream;

    let mut r = ByteStream::new(encoded);
    let _outer_len = r.read_sequence_header()?;
    let outer_start = r.position();

    let wrapped_body = r.read_raw_object(encoded.len())?;
    let wrapped_body_bytes = wrapped_body.bytes.clone();

    let alg_seq = r.read_raw_object(encoded.len())?;
    let declared_oid = {
        let mut inner = ByteStream::new(alg_seq.content());
        inner.read_oid()?
    };
    if declared_oid.as_slice() != rsa_with_sha_oid(expected_hash) {
        return Err(CoreError::Signature(
            "AlgorithmIdentifier does not match the expected signing key algorithm".to_string(),
        ));
    }

    let (_unused, signature) = r.read_bit_string()?;
    let _ = outer_start;

    let body = match wrapper_spec {
        WrapperSpec::Plain => wrapped_body_bytes,
        _ => wrapped_body.content().to_vec(),
    };
    let digest = expected_hash.digest(&body);

    match verifying_key.verify(expected_hash, &digest, &signature) {
        Ok(()) => Ok(VerifyOutcome::Valid),
        Err(e) => {
            if let (Some(issuer_kid), Some(subject_akid)) = (issuer_key_id, subject_authority_key_id) {
                if issuer_kid == subject_akid {
                    return Err(CoreError::bad_data_at(
                        "signature verification failed but keyIDs match: treating as data corruption",
                        ErrorLocus::PublicKey,
                        ErrorType::AttrValue,
                    ));
                }
            }
            Err(e)
        }
    }
}

/// Compute the `keyID` (spec §4.3) of a `SubjectPublicKeyInfo`.
pub fn spki_key_id(spki_der: &[u8]) -> Identifier {
    key_id(spki_der)
}

/// `rsaEncryption` (no parameters beyond `NULL`), the only SPKI algorithm
/// this crate emits.
const RSA_ENCRYPTION_OID: &[u32] = &[1, 2, 840, 113549, 1, 1, 1];

/// Encode an RSA public key as a `SubjectPublicKeyInfo` (spec §4.5): the
/// conventional `rsaEncryption` `AlgorithmIdentifier` plus the
/// `RSAPublicKey` DER (`SEQUENCE { modulus, publicExponent }`) carried as
/// the `BIT STRING` payload.
pub fn encode_rsa_spki(pk: &RsaPublicKey) -> Vec<u8> {
    use rsa::traits::PublicKeyParts;

    let mut rsa_pub_body = ByteWriter::new();
    rsa_pub_body.write_bignum(&pk.n().to_bytes_be());
    rsa_pub_body.write_bignum(&pk.e().to_bytes_be());
    let rsa_pub_body_bytes = rsa_pub_body.into_bytes();
    let mut rsa_pub = ByteWriter::new();
    rsa_pub.write_sequence_header(rsa_pub_body_bytes.len());
    rsa_pub.push_raw(&rsa_pub_body_bytes);
    let rsa_pub_bytes = rsa_pub.into_bytes();

    let mut algo_body = ByteWriter::new();
    algo_body
        .write_oid(RSA_ENCRYPTION_OID)
        .expect("rsaEncryption OID always encodes");
    algo_body.write_null();
    let algo_body_bytes = algo_body.into_bytes();
    let mut algo = ByteWriter::new();
    algo.write_sequence_header(algo_body_bytes.len());
    algo.push_raw(&algo_body_bytes);
    let algo_bytes = algo.into_bytes();

    let mut spki_body = ByteWriter::new();
    spki_body.push_raw(&algo_bytes);
    spki_body.write_bit_string(&rsa_pub_bytes);
    let spki_body_bytes = spki_body.into_bytes();

    let mut spki = ByteWriter::new();
    spki.write_sequence_header(spki_body_bytes.len());
    spki.push_raw(&spki_body_bytes);
    spki.into_bytes()
}

/// Recover an RSA public key from a `SubjectPublicKeyInfo` built by
/// [`encode_rsa_spki`].
pub fn decode_rsa_spki(spki_der: &[u8]) -> Result<RsaPublicKey> {
    use crate::asn1::stream::ByteStream;

    let mut outer = ByteStream::new(spki_der);
    let _len = outer.read_sequence_header()?;
    let _algorithm = outer.read_raw_object(spki_der.len())?;
    let (_unused, rsa_pub_bytes) = outer.read_bit_string()?;

    let mut inner = ByteStream::new(&rsa_pub_bytes);
    let _rsa_pub_len = inner.read_sequence_header()?;
    let n = inner.read_bignum()?;
    let e = inner.read_bignum()?;
    RsaPublicKey::new(rsa::BigUint::from_bytes_be(&n), rsa::BigUint::from_bytes_be(&e))
        .map_err(|e| CoreError::bad_data(format!("invalid RSA SubjectPublicKeyInfo: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    fn test_key() -> SigningKey {
        let mut rng = rand::rngs::OsRng;
        let sk = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
        SigningKey::Rsa(Box::new(sk))
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let key = test_key();
        let body = b"tbsCertificate placeholder bytes";
        let signed =
            create_x509_signature(body, &key, HashAlgo::Sha1, WrapperSpec::Plain, true).unwrap();
        let verifying = key.public_key();
        let outcome =
            verify_x509_signature(&signed, WrapperSpec::Plain, &verifying, HashAlgo::Sha1, None, None)
                .unwrap();
        assert_eq!(outcome, VerifyOutcome::Valid);
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = test_key();
        let other = test_key();
        let body = b"tbsCertificate placeholder bytes";
        let signed =
            create_x509_signature(body, &key, HashAlgo::Sha1, WrapperSpec::Plain, false).unwrap();
        let verifying = other.public_key();
        let err =
            verify_x509_signature(&signed, WrapperSpec::Plain, &verifying, HashAlgo::Sha1, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn keyid_disambiguation_recodes_bad_data_when_keyids_match() {
        let key = test_key();
        let other = test_key();
        let body = b"tbsCertificate placeholder bytes";
        let signed =
            create_x509_signature(body, &key, HashAlgo::Sha1, WrapperSpec::Plain, false).unwrap();
        let verifying = other.public_key();
        let kid = Identifier::from_digest([1u8; 20]);
        let err = verify_x509_signature(
            &signed,
            WrapperSpec::Plain,
            &verifying,
            HashAlgo::Sha1,
            Some(kid),
            Some(kid),
        );
        assert!(matches!(err, Err(CoreError::BadData { .. })));
    }

    #[test]
    fn implicit_tag_wrapper_round_trips() {
        let key = test_key();
        let body = b"POPOSigningKey body";
        let signed = create_x509_signature(
            body,
            &key,
            HashAlgo::Sha1,
            WrapperSpec::ImplicitTag(1),
            false,
        )
        .unwrap();
        let verifying = key.public_key();
        let outcome = verify_x509_signature(
            &signed,
            WrapperSpec::ImplicitTag(1),
            &verifying,
            HashAlgo::Sha1,
            None,
            None,
        )
        .unwrap();
        assert_eq!(outcome, VerifyOutcome::Valid);
    }

    #[test]
    fn rsa_spki_round_trips() {
        let key = test_key();
        let SigningKey::Rsa(sk) = &key;
        let pk = sk.to_public_key();
        let spki = encode_rsa_spki(&pk);
        let recovered = decode_rsa_spki(&spki).unwrap();
        assert_eq!(recovered, pk);
    }

    #[test]
    fn self_check_detects_a_flipped_signature_bit() {
        let key = test_key();
        let body = b"tbsCertificate placeholder bytes";
        let digest = HashAlgo::Sha256.digest(body);
        let mut signature = key.sign(HashAlgo::Sha256, &digest).unwrap();
        signature[0] ^= 0x01;
        let verifying = key.public_key();
        let err = self_check(&verifying, HashAlgo::Sha256, &digest, &signature);
        assert!(err.is_err());
    }
}
