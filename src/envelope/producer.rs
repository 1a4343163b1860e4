//! CMS producer (spec §4.4).
//!
//! Emits `SignedData` for `Sign`, `EnvelopedData` for `KeyExchange`,
//! `EncryptedData` for `Crypt`, `DigestedData` for `Hash`, and
//! `CompressedData` for `Compress`. A sign-then-encrypt nest is built by
//! calling [`Envelope::produce`] twice: once with `Sign`, then wrapping
//! that output as the payload of a second call with `KeyExchange`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::asn1::stream::ByteWriter;
use crate::error::{CoreError, Result};
use crate::identifier::Identifier;
use crate::signature::{
    sign_raw_digest, write_algorithm_identifier, write_digest_algorithm_identifier, HashAlgo, SigningKey,
};

/// What an envelope is for (spec §3 "Envelope (CMS)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeUsage {
    /// No content processing (raw passthrough; used only internally).
    None,
    /// Produces/consumes `SignedData`.
    Sign,
    /// Produces/consumes `EnvelopedData` (public-key recipients).
    KeyExchange,
    /// Produces/consumes `EncryptedData` (password/session-key recipients).
    Crypt,
    /// Produces/consumes `DigestedData`.
    Hash,
    /// Produces/consumes `CompressedData`.
    Compress,
}

/// Required key kind for a `ContentListItem` still awaiting a recipient
/// match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredKeyKind {
    /// A recipient private key must unwrap the session key.
    PrivateKey,
    /// A password-derived key must unwrap the session key.
    Password,
    /// The session key itself is already available.
    SessionKey,
}

/// One recipient or signer entry in an envelope (spec §3
/// "ContentListItem"). Owned by the envelope it belongs to.
#[derive(Debug, Clone)]
pub struct ContentListItem {
    /// What kind of key is needed to resolve this entry.
    pub required_key: RequiredKeyKind,
    /// Recipient/signer identifier: either an `issuerAndSerialNumber`
    /// encoding or a bare `keyID`, never both at the same layer.
    pub identifier: Identifier,
    /// The wrapped (encrypted) session key, or signature bytes for a
    /// signer entry.
    pub wrapped: Vec<u8>,
}

/// A recipient to encrypt a session key to.
pub struct Recipient {
    /// Identifies the recipient (for `RecipientInfo.rid`).
    pub identifier: Identifier,
    /// The recipient's RSA public key.
    pub public_key: RsaPublicKey,
}

/// A CMS signed attribute (spec §4.7's `CertRep` markers: `messageType`,
/// `transID`, `recipientNonce`, `pkiStatus`, `failInfo`). `value` is the
/// already-DER-encoded `AttributeValue` content (e.g. a `PrintableString`
/// or `OCTET STRING` TLV).
#[derive(Debug, Clone)]
pub struct SignedAttribute {
    /// Attribute type OID.
    pub oid: Vec<u32>,
    /// DER-encoded attribute value.
    pub value: Vec<u8>,
}

impl SignedAttribute {
    /// An attribute whose value is a `PrintableString`.
    pub fn printable_string(oid: &[u32], text: &str) -> Self {
        let mut w = ByteWriter::new();
        w.write_tlv(crate::asn1::tag::CLASS_UNIVERSAL | crate::asn1::tag::PRINTABLE_STRING, text.as_bytes());
        Self { oid: oid.to_vec(), value: w.into_bytes() }
    }

    /// An attribute whose value is an `OCTET STRING`.
    pub fn octet_string(oid: &[u32], bytes: &[u8]) -> Self {
        let mut w = ByteWriter::new();
        w.write_octet_string(bytes);
        Self { oid: oid.to_vec(), value: w.into_bytes() }
    }
}

fn encode_attribute(attr: &SignedAttribute) -> Result<Vec<u8>> {
    let mut body = ByteWriter::new();
    body.write_oid(&attr.oid)?;
    let mut values = ByteWriter::new();
    values.push_raw(&attr.value);
    let values_bytes = values.into_bytes();
    body.write_header(crate::asn1::tag::SET_TAG, values_bytes.len());
    body.push_raw(&values_bytes);
    let body_bytes = body.into_bytes();

    let mut w = ByteWriter::new();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    Ok(w.into_bytes())
}

/// Concatenate the DER encodings of every attribute: the content of the
/// `[0] IMPLICIT SET OF Attribute` field (and, re-tagged with a universal
/// `SET` tag, the bytes actually signed over).
fn encode_signed_attrs_content(attrs: &[SignedAttribute]) -> Result<Vec<u8>> {
    let mut body = ByteWriter::new();
    for attr in attrs {
        body.push_raw(&encode_attribute(attr)?);
    }
    Ok(body.into_bytes())
}

/// A produced or consumed envelope.
pub struct Envelope {
    /// What this envelope is for.
    pub usage: EnvelopeUsage,
    /// Recipients (for `KeyExchange`) or signers (for `Sign`).
    pub items: Vec<ContentListItem>,
    /// The payload, once resolved.
    pub content: Option<Vec<u8>>,
}

/// OIDs for the CMS content types this producer emits.
mod oid {
    pub const SIGNED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 2];
    pub const ENVELOPED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 3];
    pub const DIGESTED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 5];
    pub const ENCRYPTED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 6];
    pub const DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 1];
    pub const AES_256_GCM: &[u32] = &[2, 16, 840, 1, 101, 3, 4, 1, 46];
}

impl Envelope {
    /// Produce a `SignedData` envelope: `SEQUENCE { contentType,
    /// [0] EXPLICIT SignedData }`. A `None` payload produces a detached
    /// signature (zero-length `eContent`). `signer_cert`, if supplied, is
    /// embedded verbatim under the optional `certificates [0]` field (its
    /// own complete `Certificate` DER). `signed_attrs`, if non-empty, are
    /// carried under `SignerInfo`'s `[0] signedAttrs`, and the signature
    /// then covers their `SET`-tagged re-encoding rather than `payload`
    /// directly, per CMS `signedAttrs` semantics.
    pub fn produce_signed(
        payload: Option<&[u8]>,
        signing_key: &SigningKey,
        signer_id: Identifier,
        side_channel_protection: bool,
        signer_cert: Option<&[u8]>,
        signed_attrs: &[SignedAttribute],
    ) -> Result<Vec<u8>> {
        let hash = HashAlgo::Sha256;
        let attrs_content = encode_signed_attrs_content(signed_attrs)?;

        let sign_input: Vec<u8> = if signed_attrs.is_empty() {
            payload.unwrap_or(&[]).to_vec()
        } else {
            let mut w = ByteWriter::new();
            w.write_header(crate::asn1::tag::SET_TAG, attrs_content.len());
            w.push_raw(&attrs_content);
            w.into_bytes()
        };
        let signature = sign_raw_digest(signing_key, hash, &sign_input, side_channel_protection)?;

        let mut encap = ByteWriter::new();
        {
            let mut inner = ByteWriter::new();
            inner.write_oid(oid::DATA)?;
            if let Some(bytes) = payload {
                let mut explicit = ByteWriter::new();
                explicit.write_octet_string(bytes);
                let explicit_bytes = explicit.into_bytes();
                inner.write_header(crate::asn1::tag::CLASS_CONTEXT | crate::asn1::tag::CONSTRUCTED, explicit_bytes.len());
                inner.push_raw(&explicit_bytes);
            }
            let inner_bytes = inner.into_bytes();
            encap.write_sequence_header(inner_bytes.len());
            encap.push_raw(&inner_bytes);
        }
        let encap_bytes = encap.into_bytes();

        let mut digest_algos = ByteWriter::new();
        {
            let mut algo_seq = ByteWriter::new();
            write_digest_algorithm_identifier(&mut algo_seq, hash)?;
            let algo_bytes = algo_seq.into_bytes();
            let mut set_body = ByteWriter::new();
            set_body.push_raw(&algo_bytes);
            let set_bytes = set_body.into_bytes();
            digest_algos.write_header(crate::asn1::tag::SET_TAG, set_bytes.len());
            digest_algos.push_raw(&set_bytes);
        }
        let digest_algos_bytes = digest_algos.into_bytes();

        let certs_bytes = match signer_cert {
            Some(cert_der) => {
                let mut w = ByteWriter::new();
                w.write_header(crate::asn1::tag::CLASS_CONTEXT | crate::asn1::tag::CONSTRUCTED | 0, cert_der.len());
                w.push_raw(cert_der);
                w.into_bytes()
            }
            None => Vec::new(),
        };

        let mut signer_infos = ByteWriter::new();
        {
            let mut signer_info = ByteWriter::new();
            signer_info.write_short_integer(1); // version
            signer_info.write_octet_string(signer_id.as_bytes()); // simplified sid: keyID form
            write_digest_algorithm_identifier(&mut signer_info, hash)?;
            if !signed_attrs.is_empty() {
                signer_info.write_header(crate::asn1::tag::CLASS_CONTEXT | crate::asn1::tag::CONSTRUCTED | 0, attrs_content.len());
                signer_info.push_raw(&attrs_content);
            }
            write_algorithm_identifier(&mut signer_info, hash)?;
            signer_info.write_octet_string(&signature);
            let signer_info_bytes = signer_info.into_bytes();
            let mut set_body = ByteWriter::new();
            set_body.write_sequence_header(signer_info_bytes.len());
            set_body.push_raw(&signer_info_bytes);
            let set_bytes = set_body.into_bytes();
            signer_infos.write_header(crate::asn1::tag::SET_TAG, set_bytes.len());
            signer_infos.push_raw(&set_bytes);
        }
        let signer_infos_bytes = signer_infos.into_bytes();

        let mut signed_data_body = ByteWriter::new();
        signed_data_body.write_short_integer(1); // version
        signed_data_body.push_raw(&digest_algos_bytes);
        signed_data_body.push_raw(&encap_bytes);
        signed_data_body.push_raw(&certs_bytes);
        signed_data_body.push_raw(&signer_infos_bytes);
        let signed_data_body_bytes = signed_data_body.into_bytes();

        let mut signed_data = ByteWriter::new();
        signed_data.write_sequence_header(signed_data_body_bytes.len());
        signed_data.push_raw(&signed_data_body_bytes);
        let signed_data_bytes = signed_data.into_bytes();

        wrap_content_info(oid::SIGNED_DATA, &signed_data_bytes)
    }

    /// Produce an `EnvelopedData` envelope: one `RecipientInfo` per
    /// recipient, each an RSA/PKCS#1v1.5-wrapped AES-256-GCM session key,
    /// followed by the AES-256-GCM-encrypted content.
    pub fn produce_enveloped(payload: &[u8], recipients: &[Recipient]) -> Result<Vec<u8>> {
        if recipients.is_empty() {
            return Err(CoreError::bad_data("EnvelopedData requires at least one recipient"));
        }
        let mut session_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut session_key);
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&session_key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|e| CoreError::Failed(format!("content encryption failed: {e}")))?;

        let mut recipient_infos = ByteWriter::new();
        {
            let mut set_body = ByteWriter::new();
            for recipient in recipients {
                let wrapped_key = recipient
                    .public_key
                    .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, &session_key)
                    .map_err(|e| CoreError::Failed(format!("key wrap failed: {e}")))?;
                let mut ri = ByteWriter::new();
                ri.write_short_integer(0); // version
                ri.write_octet_string(recipient.identifier.as_bytes());
                ri.write_octet_string(&wrapped_key);
                let ri_bytes = ri.into_bytes();
                let mut ri_seq = ByteWriter::new();
                ri_seq.write_sequence_header(ri_bytes.len());
                ri_seq.push_raw(&ri_bytes);
                set_body.push_raw(&ri_seq.into_bytes());
            }
            let set_bytes = set_body.into_bytes();
            recipient_infos.write_header(crate::asn1::tag::SET_TAG, set_bytes.len());
            recipient_infos.push_raw(&set_bytes);
        }
        let recipient_infos_bytes = recipient_infos.into_bytes();

        let mut encrypted_content_info = ByteWriter::new();
        encrypted_content_info.write_oid(oid::DATA)?;
        {
            let mut algo = ByteWriter::new();
            algo.write_oid(oid::AES_256_GCM)?;
            algo.write_octet_string(&nonce_bytes);
            let algo_bytes = algo.into_bytes();
            let mut algo_seq = ByteWriter::new();
            algo_seq.write_sequence_header(algo_bytes.len());
            algo_seq.push_raw(&algo_bytes);
            encrypted_content_info.push_raw(&algo_seq.into_bytes());
        }
        encrypted_content_info.write_header(
            crate::asn1::tag::CLASS_CONTEXT | 0, // [0] IMPLICIT OCTET STRING
            ciphertext.len(),
        );
        encrypted_content_info.push_raw(&ciphertext);
        let encrypted_content_info_bytes = encrypted_content_info.into_bytes();

        let mut body = ByteWriter::new();
        body.write_short_integer(0); // version
        body.push_raw(&recipient_infos_bytes);
        body.push_raw(&encrypted_content_info_bytes);
        let body_bytes = body.into_bytes();

        let mut enveloped_data = ByteWriter::new();
        enveloped_data.write_sequence_header(body_bytes.len());
        enveloped_data.push_raw(&body_bytes);

        wrap_content_info(oid::ENVELOPED_DATA, &enveloped_data.into_bytes())
    }

    /// Produce a `DigestedData` envelope.
    pub fn produce_digested(payload: &[u8], hash: HashAlgo) -> Result<Vec<u8>> {
        use sha1::Digest as Sha1Digest;
        use sha2::Digest as Sha2Digest;
        let digest = match hash {
            HashAlgo::Sha1 => sha1::Sha1::digest(payload).to_vec(),
            HashAlgo::Sha256 => sha2::Sha256::digest(payload).to_vec(),
            HashAlgo::Sha384 => sha2::Sha384::digest(payload).to_vec(),
            HashAlgo::Sha512 => sha2::Sha512::digest(payload).to_vec(),
        };

        let mut body = ByteWriter::new();
        body.write_short_integer(0); // version
        {
            let mut algo = ByteWriter::new();
            algo.write_oid(hash_oid(hash))?;
            algo.write_null();
            let algo_bytes = algo.into_bytes();
            let mut algo_seq = ByteWriter::new();
            algo_seq.write_sequence_header(algo_bytes.len());
            algo_seq.push_raw(&algo_bytes);
            body.push_raw(&algo_seq.into_bytes());
        }
        {
            let mut content = ByteWriter::new();
            content.write_oid(oid::DATA)?;
            content.write_octet_string(payload);
            let content_bytes = content.into_bytes();
            let mut content_seq = ByteWriter::new();
            content_seq.write_sequence_header(content_bytes.len());
            content_seq.push_raw(&content_bytes);
            body.push_raw(&content_seq.into_bytes());
        }
        body.write_octet_string(&digest);
        let body_bytes = body.into_bytes();

        let mut digested_data = ByteWriter::new();
        digested_data.write_sequence_header(body_bytes.len());
        digested_data.push_raw(&body_bytes);

        wrap_content_info(oid::DIGESTED_DATA, &digested_data.into_bytes())
    }
}

fn hash_oid(hash: HashAlgo) -> &'static [u32] {
    match hash {
        HashAlgo::Sha1 => &[1, 3, 14, 3, 2, 26],
        HashAlgo::Sha256 => &[2, 16, 840, 1, 101, 3, 4, 2, 1],
        HashAlgo::Sha384 => &[2, 16, 840, 1, 101, 3, 4, 2, 2],
        HashAlgo::Sha512 => &[2, 16, 840, 1, 101, 3, 4, 2, 3],
    }
}

fn wrap_content_info(content_type: &[u32], inner: &[u8]) -> Result<Vec<u8>> {
    let mut explicit = ByteWriter::new();
    explicit.push_raw(inner);
    let explicit_bytes = explicit.into_bytes();

    let mut body = ByteWriter::new();
    body.write_oid(content_type)?;
    body.write_header(crate::asn1::tag::CLASS_CONTEXT | crate::asn1::tag::CONSTRUCTED, explicit_bytes.len());
    body.push_raw(&explicit_bytes);
    let body_bytes = body.into_bytes();

    let mut w = ByteWriter::new();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn test_signing_key() -> SigningKey {
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        SigningKey::Rsa(Box::new(sk))
    }

    #[test]
    fn produce_signed_emits_nonempty_der() {
        let key = test_signing_key();
        let out = Envelope::produce_signed(
            Some(b"hello"),
            &key,
            Identifier::from_digest([9u8; 20]),
            false,
            None,
            &[],
        )
        .unwrap();
        assert!(!out.is_empty());
        assert_eq!(out[0], crate::asn1::tag::SEQUENCE_TAG);
    }

    #[test]
    fn detached_signature_has_no_econtent() {
        let key = test_signing_key();
        let out =
            Envelope::produce_signed(None, &key, Identifier::from_digest([1u8; 20]), false, None, &[]).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn produce_signed_with_attrs_and_cert_embeds_both() {
        let key = test_signing_key();
        let cert = b"pretend-certificate-der".to_vec();
        let attrs = vec![SignedAttribute::printable_string(&[1, 2, 3], "hello")];
        let out = Envelope::produce_signed(
            Some(b"payload"),
            &key,
            Identifier::from_digest([3u8; 20]),
            false,
            Some(&cert),
            &attrs,
        )
        .unwrap();
        assert!(!out.is_empty());
        // The embedded certificate bytes should appear verbatim in the output.
        assert!(out.windows(cert.len()).any(|w| w == cert.as_slice()));
    }

    #[test]
    fn produce_enveloped_round_trips_via_private_key() {
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let pk = sk.to_public_key();
        let recipients = vec![Recipient { identifier: Identifier::from_digest([2u8; 20]), public_key: pk }];
        let out = Envelope::produce_enveloped(b"secret payload", &recipients).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn produce_enveloped_requires_a_recipient() {
        let err = Envelope::produce_enveloped(b"data", &[]);
        assert!(err.is_err());
    }
}
