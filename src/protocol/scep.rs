//! SCEP-style certificate-issuance transaction (spec §4.7) — the
//! flagship composition of every lower layer.

use std::sync::Arc;

use crate::asn1::stream::{ByteStream, ByteWriter};
use crate::asn1::tag;
use crate::cert::dn::{oid as dn_oid, simple_dn, DistinguishedName};
use crate::cert::{CertFlags, CertKind, CertObject, Validity};
use crate::config::Config;
use crate::envelope::consumer::{DeenvelopeConsumer, StepOutcome};
use crate::envelope::producer::{Envelope, Recipient, SignedAttribute};
use crate::error::{CoreError, Result};
use crate::identifier::Identifier;
use crate::signature::{
    decode_rsa_spki, encode_rsa_spki, spki_key_id, write_algorithm_identifier, HashAlgo, SigningKey, WrapperSpec,
};
use crate::store::CertStore;

/// `challengePassword` attribute OID (PKCS#9).
const OID_CHALLENGE_PASSWORD: &[u32] = &[1, 2, 840, 113549, 1, 9, 7];

/// `messageType` signed-attribute OID (`id-messageType`, SCEP private arc).
const OID_MESSAGE_TYPE: &[u32] = &[2, 16, 840, 1, 113733, 1, 9, 2];
/// `transID` signed-attribute OID.
const OID_TRANS_ID: &[u32] = &[2, 16, 840, 1, 113733, 1, 9, 7];
/// `senderNonce` signed-attribute OID.
const OID_SENDER_NONCE: &[u32] = &[2, 16, 840, 1, 113733, 1, 9, 5];
/// `recipientNonce` signed-attribute OID.
const OID_RECIPIENT_NONCE: &[u32] = &[2, 16, 840, 1, 113733, 1, 9, 6];
/// `pkiStatus` signed-attribute OID.
const OID_PKI_STATUS: &[u32] = &[2, 16, 840, 1, 113733, 1, 9, 3];
/// `failInfo` signed-attribute OID.
const OID_FAIL_INFO: &[u32] = &[2, 16, 840, 1, 113733, 1, 9, 4];

/// SCEP `messageType` values this engine understands (spec §6, cryptlib
/// `scep.c`).
pub mod message_type {
    /// `PKCSReq`: a certificate request.
    pub const PKCS_REQ: &str = "19";
    /// `CertRep`: a certificate-issuance response.
    pub const CERT_REP: &str = "3";
}

/// SCEP `pkiStatus` values.
pub mod pki_status {
    /// The request succeeded.
    pub const SUCCESS: &str = "0";
    /// The request failed; see `failInfo`.
    pub const FAILURE: &str = "2";
}

/// SCEP `failInfo` reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailInfo {
    /// Unrecognised or unsupported algorithm.
    BadAlg,
    /// Integrity check (signature or MAC) failed.
    BadMessageCheck,
    /// The request itself could not be satisfied.
    BadRequest,
    /// A timestamp was out of the acceptable window.
    BadTime,
    /// No certificate matches the given identifier.
    BadCertId,
}

impl FailInfo {
    /// The ASCII-decimal wire form (spec §6 "integers as strings").
    pub fn wire_value(self) -> &'static str {
        match self {
            FailInfo::BadAlg => "0",
            FailInfo::BadMessageCheck => "1",
            FailInfo::BadRequest => "2",
            FailInfo::BadTime => "3",
            FailInfo::BadCertId => "4",
        }
    }
}

/// Per-transaction state (spec §4.7's server-side diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not yet started.
    Idle,
    /// Reading and verifying the outer signed envelope.
    ReadOuterSig,
    /// Decrypting the inner enveloped PKCS#10.
    ReadInnerEnc,
    /// Checking the challenge password against the PKI-user record.
    Authenticate,
    /// Issuing the certificate via the store.
    Issue,
    /// A success response is ready to send.
    BuildOk,
    /// A failure response is ready to send.
    BuildError(FailInfo),
    /// The outer envelope itself failed: the transaction closes silently,
    /// with no response sent at all (anti-DoS, spec §4.7).
    Close,
}

/// Outcome of a completed server-side transaction.
pub struct TransactionResult {
    /// Final state reached.
    pub state: TransactionState,
    /// The double-wrapped response bytes, if a reply is to be sent at
    /// all (`None` for `Close`).
    pub response: Option<Vec<u8>>,
}

/// Drives one server-side SCEP transaction end to end.
pub struct ScepTransaction<'a> {
    store: &'a Arc<dyn CertStore>,
    ca_signing_key: &'a SigningKey,
    ca_key_recipient: Identifier,
    max_serial_size: usize,
    side_channel_protection: bool,
}

impl<'a> ScepTransaction<'a> {
    /// Build a transaction driver bound to a store and the CA's signing
    /// key (also used, via its public half, to decrypt inbound
    /// `EnvelopedData`: in practice the CA holds a distinct key-exchange
    /// key, but this engine reuses the same key-pair rather than
    /// modelling a second one).
    pub fn new(
        store: &'a Arc<dyn CertStore>,
        ca_signing_key: &'a SigningKey,
        ca_key_recipient: Identifier,
        max_serial_size: usize,
        side_channel_protection: bool,
    ) -> Self {
        Self { store, ca_signing_key, ca_key_recipient, max_serial_size, side_channel_protection }
    }

    /// Run one full transaction against `request_bytes` (the double-wrapped
    /// `SignedData(EnvelopedData(PKCS10))` body from the HTTP POST): steps
    /// 1-8 of the server-side diagram (spec §4.7), from the outer signature
    /// check through to a ready-to-send response envelope.
    pub async fn run(&self, request_bytes: &[u8]) -> Result<TransactionResult> {
        let mut outer = DeenvelopeConsumer::new();
        outer.push(request_bytes);
        let outer_outcome = match outer.step() {
            Ok(o) => o,
            Err(_) => return Ok(TransactionResult { state: TransactionState::Close, response: None }),
        };
        // A fully self-contained request needs no recipient match at the
        // outer (signed) layer; anything else at this layer is treated
        // as an outer-envelope failure and closed silently.
        if !matches!(outer_outcome, StepOutcome::Done) {
            return Ok(TransactionResult { state: TransactionState::Close, response: None });
        }

        // Step 3: pull transID/senderNonce/messageType off the outer
        // signedAttrs.
        let transaction_id = match outer.signed_attribute(OID_TRANS_ID) {
            Some(bytes) => String::from_utf8_lossy(bytes).to_string(),
            None => return Ok(TransactionResult { state: TransactionState::Close, response: None }),
        };
        let sender_nonce = outer.signed_attribute(OID_SENDER_NONCE).map(|b| b.to_vec()).unwrap_or_default();
        let message_type = outer.signed_attribute(OID_MESSAGE_TYPE).map(|b| String::from_utf8_lossy(b).to_string());
        if message_type.as_deref() != Some(message_type::PKCS_REQ) {
            return self.build_error(FailInfo::BadRequest, &transaction_id).await;
        }

        // Step 2: recover and validate the client's ephemeral signer. Its
        // public key both verifies this request and is the key the
        // response will eventually be encrypted to.
        let client_cert_der = match outer.signer_certificate() {
            Some(c) => c.to_vec(),
            None => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        let client_public_key = match recover_signer_public_key(&client_cert_der) {
            Ok(k) => k,
            Err(_) => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        let signed_content = match outer.signed_content() {
            Some(c) => c,
            None => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        let signature = match outer.signature() {
            Some(s) => s,
            None => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        let verifying_key = crate::signature::VerifyingKey::Rsa(Box::new(client_public_key.clone()));
        if crate::signature::verify_raw_digest(&verifying_key, HashAlgo::Sha256, &signed_content, signature).is_err()
        {
            return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await;
        }

        let inner_payload = match outer.content() {
            Some(bytes) => bytes.to_vec(),
            None => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };

        // Step 4: decrypt the inner EnvelopedData addressed to the CA.
        let mut inner = DeenvelopeConsumer::new();
        inner.push(&inner_payload);
        let inner_outcome = match inner.step() {
            Ok(o) => o,
            Err(_) => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        if !matches!(inner_outcome, StepOutcome::NeedKeyMaterial) {
            return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await;
        }
        let session_key = match inner.unwrap_session_key(&self.ca_key_recipient, self.ca_signing_key.rsa_private_key())
        {
            Ok(k) => k,
            Err(_) => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        inner.supply_session_key(session_key);
        let inner_outcome = match inner.step() {
            Ok(o) => o,
            Err(_) => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };
        if !matches!(inner_outcome, StepOutcome::Done) {
            return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await;
        }
        let pkcs10_der = match inner.content() {
            Some(bytes) => bytes.to_vec(),
            None => return self.build_error(FailInfo::BadMessageCheck, &transaction_id).await,
        };

        let request = match parse_pkcs10_request(&pkcs10_der) {
            Ok(r) => r,
            Err(_) => return self.build_error(FailInfo::BadRequest, &transaction_id).await,
        };

        // Steps 5-8: authenticate, issue, and build the response.
        self.authenticate_and_issue(
            &transaction_id,
            &request.challenge_password,
            &request.common_name,
            &request.spki,
            &sender_nonce,
            client_public_key,
        )
        .await
    }

    /// Steps 5 through 8: authenticate a PKCS#10-derived request against
    /// the PKI-user table, issue a certificate, and build the response
    /// envelope. Split out from [`ScepTransaction::run`] because parsing
    /// the inner PKCS#10 (an external concern: PKCS#10 isn't named as a
    /// [MODULE] of its own) is the caller's job.
    pub async fn authenticate_and_issue(
        &self,
        transaction_id: &str,
        challenge_password: &str,
        requested_cn: &str,
        requested_spki: &[u8],
        client_nonce: &[u8],
        client_public_key: rsa::RsaPublicKey,
    ) -> Result<TransactionResult> {
        let user = match self.store.find_pki_user(transaction_id).await? {
            Some(u) => u,
            None => return self.build_error(FailInfo::BadMessageCheck, transaction_id).await,
        };
        if !user.password_matches(challenge_password) {
            return self.build_error(FailInfo::BadMessageCheck, transaction_id).await;
        }

        let common_name = user.fixed_common_name.as_deref().unwrap_or(requested_cn);
        if common_name.is_empty() {
            return self.build_error(FailInfo::BadRequest, transaction_id).await;
        }

        let mut cert = CertObject::new(CertKind::Cert);
        cert.set_subject_dn(simple_dn(&[(dn_oid::COMMON_NAME, common_name)])?)?;
        cert.set_issuer_dn(simple_dn(&[(dn_oid::COMMON_NAME, "Issuing CA")])?)?;
        let now = chrono::Utc::now();
        cert.set_validity(Validity {
            not_before: now,
            not_after: now + chrono::Duration::days(365),
        })?;
        // Server-assigned serial: derived from the transaction ID's
        // identity hash rather than trusting anything in the request.
        let serial = crate::identifier::name_id(transaction_id.as_bytes()).as_bytes()[..self.max_serial_size.min(20)].to_vec();
        cert.set_serial(serial, self.max_serial_size)?;
        cert.set_public_key_info(requested_spki.to_vec())?;

        let tbs = build_tbs_certificate(&cert, HashAlgo::Sha256)?;
        let signed = crate::signature::create_x509_signature(
            &tbs,
            self.ca_signing_key,
            HashAlgo::Sha256,
            WrapperSpec::Plain,
            self.side_channel_protection,
        )?;
        cert.finalize_signed(
            signed,
            vec![1, 2, 840, 113549, 1, 1, 11],
            CertFlags { self_signed: false, sig_checked: false, data_only: false, cert_collection: false },
        )?;

        let cert_id = cert.cert_id().expect("cert is signed, cert_id must resolve");
        let issued_cert_der = cert.encoded_bytes().expect("cert is signed, encoding must resolve").to_vec();
        self.store.insert(cert_id, cert).await.ok();

        self.build_ok(transaction_id, client_nonce, client_public_key, &issued_cert_der).await
    }

    /// Step 8: encrypt the issued certificate to the client's ephemeral
    /// signer key (recovered by the caller from the request's outer
    /// `SignedData`, never a throwaway key) and wrap it in a `CertRep`
    /// response carrying the required signed attributes.
    async fn build_ok(
        &self,
        transaction_id: &str,
        client_nonce: &[u8],
        client_public_key: rsa::RsaPublicKey,
        issued_cert_der: &[u8],
    ) -> Result<TransactionResult> {
        let client_recipient = spki_key_id(&encode_rsa_spki(&client_public_key));
        let enveloped = Envelope::produce_enveloped(
            issued_cert_der,
            &[Recipient { identifier: client_recipient, public_key: client_public_key }],
        )?;

        let attrs = vec![
            SignedAttribute::printable_string(OID_MESSAGE_TYPE, message_type::CERT_REP),
            SignedAttribute::printable_string(OID_TRANS_ID, transaction_id),
            SignedAttribute::octet_string(OID_RECIPIENT_NONCE, client_nonce),
            SignedAttribute::printable_string(OID_PKI_STATUS, pki_status::SUCCESS),
        ];
        let response = Envelope::produce_signed(
            Some(&enveloped),
            self.ca_signing_key,
            self.ca_key_recipient,
            self.side_channel_protection,
            None,
            &attrs,
        )?;

        Ok(TransactionResult { state: TransactionState::BuildOk, response: Some(response) })
    }

    async fn build_error(&self, fail_info: FailInfo, transaction_id: &str) -> Result<TransactionResult> {
        let attrs = vec![
            SignedAttribute::printable_string(OID_MESSAGE_TYPE, message_type::CERT_REP),
            SignedAttribute::printable_string(OID_TRANS_ID, transaction_id),
            SignedAttribute::printable_string(OID_PKI_STATUS, pki_status::FAILURE),
            SignedAttribute::printable_string(OID_FAIL_INFO, fail_info.wire_value()),
        ];
        let response = Envelope::produce_signed(
            None,
            self.ca_signing_key,
            self.ca_key_recipient,
            self.side_channel_protection,
            None,
            &attrs,
        )?;
        Ok(TransactionResult { state: TransactionState::BuildError(fail_info), response: Some(response) })
    }
}

/// Usage permission on a private key. An ephemeral certificate attached
/// to a key (the client-side proof-of-possession signer, spec §4.7 and
/// §9 "cyclic references") constrains the key to this transaction's own
/// round trip rather than letting the ephemeral identity leak into
/// broader use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPermission {
    /// No ephemeral certificate attached; normal use.
    Unconstrained,
    /// An ephemeral self-signed certificate is attached; usage is
    /// restricted to this SCEP transaction's request/response round trip.
    InternalOnly,
}

/// Client side of the SCEP transaction (spec §4.7): materialises the
/// ephemeral self-signed proof-of-possession signer and builds the outer
/// request envelope around a caller-supplied PKCS#10 request.
pub struct ClientTransaction<'a> {
    client_key: &'a SigningKey,
    transaction_id: String,
    permission: KeyPermission,
    ephemeral_cert_der: Option<Vec<u8>>,
}

impl<'a> ClientTransaction<'a> {
    /// A fresh client transaction, key not yet constrained.
    pub fn new(client_key: &'a SigningKey, transaction_id: impl Into<String>) -> Self {
        Self {
            client_key,
            transaction_id: transaction_id.into(),
            permission: KeyPermission::Unconstrained,
            ephemeral_cert_der: None,
        }
    }

    /// Current usage permission on the client key for this transaction.
    pub fn key_permission(&self) -> KeyPermission {
        self.permission
    }

    /// Build the transient self-signed proof-of-possession certificate:
    /// `serialNumber == transactionID`, `keyUsage = digitalSignature |
    /// keyEncipherment`, `selfSigned = true`. The SPKI is derived from the
    /// client's own key, not taken from the caller. Once built, the client
    /// key is constrained to [`KeyPermission::InternalOnly`] for the rest
    /// of this transaction.
    pub fn materialize_ephemeral_signer(&mut self) -> Result<CertObject> {
        let subject = simple_dn(&[(dn_oid::COMMON_NAME, self.transaction_id.as_str())])?;
        let mut cert = CertObject::new(CertKind::Cert);
        cert.set_subject_dn(subject.clone())?;
        cert.set_issuer_dn(subject)?;
        let now = chrono::Utc::now();
        cert.set_validity(Validity { not_before: now, not_after: now + chrono::Duration::hours(1) })?;
        cert.set_serial(self.transaction_id.as_bytes().to_vec(), 32)?;
        let public_key = match self.client_key.public_key() {
            crate::signature::VerifyingKey::Rsa(pk) => *pk,
        };
        cert.set_public_key_info(encode_rsa_spki(&public_key))?;
        cert.add_extension(key_usage_digital_signature_and_key_encipherment())?;

        let tbs = build_tbs_certificate(&cert, HashAlgo::Sha256)?;
        let signed =
            crate::signature::create_x509_signature(&tbs, self.client_key, HashAlgo::Sha256, WrapperSpec::Plain, true)?;
        cert.finalize_signed(
            signed,
            vec![1, 2, 840, 113549, 1, 1, 11],
            CertFlags { self_signed: true, sig_checked: true, data_only: false, cert_collection: false },
        )?;

        self.ephemeral_cert_der = Some(cert.encoded_bytes().expect("just finalized").to_vec());
        self.permission = KeyPermission::InternalOnly;
        Ok(cert)
    }

    /// Wrap `pkcs10_der` in `EnvelopedData` addressed to the server's CA
    /// key, then sign the result as the outer `SignedData` under the
    /// ephemeral signer, carrying the SCEP signed-attribute set (step 3:
    /// `messageType`, `transID`, `senderNonce`) and the ephemeral
    /// certificate itself so the server can recover this key (step 2).
    /// Requires [`Self::materialize_ephemeral_signer`] to have run first.
    pub fn build_request(
        &self,
        pkcs10_der: &[u8],
        server_recipient: Identifier,
        server_public_key: rsa::RsaPublicKey,
        sender_nonce: &[u8],
    ) -> Result<Vec<u8>> {
        if self.permission != KeyPermission::InternalOnly {
            return Err(CoreError::NotInited(
                "ephemeral signer must be materialised before building a request".to_string(),
            ));
        }
        let cert_der = self
            .ephemeral_cert_der
            .as_deref()
            .expect("InternalOnly permission implies the ephemeral cert was recorded");
        let enveloped = Envelope::produce_enveloped(
            pkcs10_der,
            &[Recipient { identifier: server_recipient, public_key: server_public_key }],
        )?;
        let attrs = vec![
            SignedAttribute::printable_string(OID_MESSAGE_TYPE, message_type::PKCS_REQ),
            SignedAttribute::printable_string(OID_TRANS_ID, &self.transaction_id),
            SignedAttribute::octet_string(OID_SENDER_NONCE, sender_nonce),
        ];
        Envelope::produce_signed(
            Some(&enveloped),
            self.client_key,
            crate::identifier::name_id(self.transaction_id.as_bytes()),
            true,
            Some(cert_der),
            &attrs,
        )
    }
}

fn key_usage_digital_signature_and_key_encipherment() -> crate::cert::Extension {
    // keyUsage ::= BIT STRING { digitalSignature(0), keyEncipherment(2) }
    // encoded with bit 0 and bit 2 set: 1010_0000 = 0xA0, one unused
    // trailing bit reported per the BIT STRING convention.
    crate::cert::Extension {
        oid: vec![2, 5, 29, 15],
        critical: true,
        value: vec![0x03, 0x02, 0x01, 0xA0],
    }
}

/// Render a real `TBSCertificate` from `cert`'s current fields, in the
/// exact layout [`crate::cert::object::locate_post_sign_spans`] (run once
/// the signature wraps this body) expects to walk: no version (v1
/// implied), `serialNumber`, `signature` AlgorithmIdentifier, `issuer`,
/// `validity`, `subject`, `subjectPublicKeyInfo`.
fn build_tbs_certificate(cert: &CertObject, hash: HashAlgo) -> Result<Vec<u8>> {
    let subject_dn = cert.subject_dn().ok_or_else(|| CoreError::NotInited("subjectDN not set".to_string()))?;
    let issuer_dn = cert.issuer_dn().ok_or_else(|| CoreError::NotInited("issuerDN not set".to_string()))?;
    let validity = cert.validity().ok_or_else(|| CoreError::NotInited("validity not set".to_string()))?;
    let serial = cert.serial().ok_or_else(|| CoreError::NotInited("serial not set".to_string()))?;
    let spki = cert.public_key_info().ok_or_else(|| CoreError::NotInited("SPKI not set".to_string()))?;

    let mut body = ByteWriter::new();
    body.write_bignum(serial);
    write_algorithm_identifier(&mut body, hash)?;
    body.push_raw(&issuer_dn.encoded);
    {
        let mut validity_body = ByteWriter::new();
        validity_body.write_utc_time(validity.not_before);
        validity_body.write_utc_time(validity.not_after);
        let validity_bytes = validity_body.into_bytes();
        body.write_sequence_header(validity_bytes.len());
        body.push_raw(&validity_bytes);
    }
    body.push_raw(&subject_dn.encoded);
    body.push_raw(spki);
    let body_bytes = body.into_bytes();

    let mut tbs = ByteWriter::new();
    tbs.write_sequence_header(body_bytes.len());
    tbs.push_raw(&body_bytes);
    Ok(tbs.into_bytes())
}

/// Step 2: recover the client's ephemeral signer public key from its
/// self-signed certificate, by running the same post-sign span machinery
/// real certificates go through and pulling the SPKI span back out.
fn recover_signer_public_key(cert_der: &[u8]) -> Result<rsa::RsaPublicKey> {
    let mut cert = CertObject::new(CertKind::Cert);
    cert.finalize_signed(
        cert_der.to_vec(),
        vec![1, 2, 840, 113549, 1, 1, 11],
        CertFlags { self_signed: true, sig_checked: false, data_only: false, cert_collection: false },
    )?;
    let spki = cert.spki_span().ok_or_else(|| CoreError::bad_data("certificate carries no SPKI span"))?;
    decode_rsa_spki(spki)
}

/// Fields of a `CertificationRequestInfo` (PKCS#10) this engine actually
/// needs to drive issuance. Not a general PKCS#10 parser: only `subject`
/// (reduced to its commonName), the raw `subjectPKInfo` bytes, and the
/// `challengePassword` attribute value are pulled out.
struct Pkcs10Request {
    common_name: String,
    spki: Vec<u8>,
    challenge_password: String,
}

fn parse_pkcs10_request(der: &[u8]) -> Result<Pkcs10Request> {
    let mut outer = ByteStream::new(der);
    outer.read_sequence_header()?;
    let info_obj = outer.read_raw_object(der.len())?;

    let mut info = ByteStream::new(info_obj.content());
    let _version = info.read_short_integer()?;
    let subject_obj = info.read_raw_object(info_obj.content().len())?;
    let config = Config::default();
    let subject_dn = DistinguishedName::parse(&subject_obj.bytes, &config)?;
    let common_name = subject_dn.common_name().unwrap_or_default().to_string();

    let spki_obj = info.read_raw_object(info_obj.content().len())?;
    let spki = spki_obj.bytes;

    let mut challenge_password = String::new();
    if info.remaining() > 0 && info.peek_tag()? == (tag::CLASS_CONTEXT | tag::CONSTRUCTED) {
        let attrs_obj = info.read_raw_object(info_obj.content().len())?;
        let mut attrs = ByteStream::new(attrs_obj.content());
        while attrs.remaining() > 0 {
            let attr_obj = attrs.read_raw_object(attrs_obj.content().len())?;
            let mut attr = ByteStream::new(attr_obj.content());
            let oid = attr.read_oid()?;
            let values_obj = attr.read_raw_object(attr_obj.content().len())?;
            if oid == OID_CHALLENGE_PASSWORD {
                let mut values = ByteStream::new(values_obj.content());
                let value_obj = values.read_raw_object(values_obj.content().len())?;
                challenge_password = String::from_utf8_lossy(value_obj.content()).to_string();
            }
        }
    }

    Ok(Pkcs10Request { common_name, spki, challenge_password })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCertStore;
    use rsa::RsaPrivateKey;

    fn test_ca_key() -> SigningKey {
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        SigningKey::Rsa(Box::new(sk))
    }

    fn store_with_user(user_id: &str, password: &str) -> Arc<dyn CertStore> {
        let mem = InMemoryCertStore::new();
        mem.register_pki_user(user_id, password, None);
        Arc::new(mem)
    }

    fn test_client_public_key() -> rsa::RsaPublicKey {
        match test_ca_key().public_key() {
            crate::signature::VerifyingKey::Rsa(pk) => *pk,
        }
    }

    /// A real PKCS#10-shaped `CertificationRequestInfo` DER: `{version=0,
    /// subject, subjectPKInfo, attributes=[0] (empty)}`, enough for
    /// [`parse_pkcs10_request`] to recover subject/SPKI from.
    fn build_test_pkcs10(common_name: &str, spki: &[u8]) -> Vec<u8> {
        let subject = simple_dn(&[(dn_oid::COMMON_NAME, common_name)]).unwrap();
        let mut body = ByteWriter::new();
        body.write_short_integer(0);
        body.push_raw(&subject.encoded);
        body.push_raw(spki);
        body.write_header(tag::CLASS_CONTEXT | tag::CONSTRUCTED, 0); // empty attributes
        let body_bytes = body.into_bytes();
        let mut w = ByteWriter::new();
        w.write_sequence_header(body_bytes.len());
        w.push_raw(&body_bytes);
        w.into_bytes()
    }

    #[tokio::test]
    async fn happy_path_issues_certificate_and_builds_ok_response() {
        let store = store_with_user("txn-001", "correct-horse-battery-staple");
        let ca_key = test_ca_key();
        let txn = ScepTransaction::new(&store, &ca_key, Identifier::from_digest([7u8; 20]), 32, false);

        let result = txn
            .authenticate_and_issue(
                "txn-001",
                "correct-horse-battery-staple",
                "test",
                &encode_rsa_spki(&test_client_public_key()),
                &[0u8; 16],
                test_client_public_key(),
            )
            .await
            .unwrap();

        assert_eq!(result.state, TransactionState::BuildOk);
        assert!(result.response.is_some());
    }

    #[tokio::test]
    async fn wrong_password_yields_bad_message_check() {
        let store = store_with_user("txn-002", "correct-horse-battery-staple");
        let ca_key = test_ca_key();
        let txn = ScepTransaction::new(&store, &ca_key, Identifier::from_digest([7u8; 20]), 32, false);

        let result = txn
            .authenticate_and_issue(
                "txn-002",
                "wrong-password",
                "test",
                &encode_rsa_spki(&test_client_public_key()),
                &[0u8; 16],
                test_client_public_key(),
            )
            .await
            .unwrap();

        assert_eq!(result.state, TransactionState::BuildError(FailInfo::BadMessageCheck));
    }

    #[tokio::test]
    async fn unknown_transaction_id_yields_bad_message_check() {
        let store = store_with_user("txn-003", "correct-horse-battery-staple");
        let ca_key = test_ca_key();
        let txn = ScepTransaction::new(&store, &ca_key, Identifier::from_digest([7u8; 20]), 32, false);

        let result = txn
            .authenticate_and_issue(
                "no-such-transaction",
                "correct-horse-battery-staple",
                "test",
                &encode_rsa_spki(&test_client_public_key()),
                &[0u8; 16],
                test_client_public_key(),
            )
            .await
            .unwrap();

        assert_eq!(result.state, TransactionState::BuildError(FailInfo::BadMessageCheck));
    }

    #[test]
    fn client_materializes_ephemeral_signer_and_constrains_key() {
        let client_key = test_ca_key();
        let mut txn = ClientTransaction::new(&client_key, "txn-client-001");
        assert_eq!(txn.key_permission(), KeyPermission::Unconstrained);

        let cert = txn.materialize_ephemeral_signer().unwrap();
        assert!(cert.is_signed());
        assert!(cert.flags().self_signed);
        assert_eq!(cert.serial(), Some("txn-client-001".as_bytes()));
        assert_eq!(txn.key_permission(), KeyPermission::InternalOnly);
    }

    #[test]
    fn build_request_is_rejected_before_materializing_the_signer() {
        let client_key = test_ca_key();
        let txn = ClientTransaction::new(&client_key, "txn-client-002");
        let server_pub = test_client_public_key();
        let err = txn.build_request(b"pkcs10-bytes", Identifier::from_digest([9u8; 20]), server_pub, &[0u8; 16]);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn client_builds_a_request_after_materializing_the_signer() {
        let client_key = test_ca_key();
        let mut txn = ClientTransaction::new(&client_key, "txn-client-003");
        txn.materialize_ephemeral_signer().unwrap();

        let server_pub = test_client_public_key();
        let request = txn
            .build_request(b"pkcs10-bytes", Identifier::from_digest([9u8; 20]), server_pub, &[0u8; 16])
            .unwrap();
        assert!(!request.is_empty());
    }

    /// End-to-end: a client materialises its ephemeral signer, builds a
    /// real request around a PKCS#10 body, and the server's `run` drives
    /// it through steps 1-8 to a `BuildOk` response it can decrypt back.
    #[tokio::test]
    async fn run_drives_a_client_built_request_to_build_ok() {
        let store = store_with_user("txn-e2e", "correct-horse-battery-staple");
        let ca_key = test_ca_key();
        let ca_recipient = Identifier::from_digest([42u8; 20]);
        let txn = ScepTransaction::new(&store, &ca_key, ca_recipient, 32, false);
        let ca_public_key = match ca_key.public_key() {
            crate::signature::VerifyingKey::Rsa(pk) => *pk,
        };

        let client_key = test_ca_key();
        let mut client = ClientTransaction::new(&client_key, "txn-e2e");
        client.materialize_ephemeral_signer().unwrap();

        let requested_key = test_client_public_key();
        let pkcs10 = build_test_pkcs10("test", &encode_rsa_spki(&requested_key));
        let request =
            client.build_request(&pkcs10, ca_recipient, ca_public_key, &[0u8; 16]).unwrap();

        let result = txn.run(&request).await.unwrap();
        assert_eq!(result.state, TransactionState::BuildOk);
        assert!(result.response.is_some());
    }

    /// A request with no matching PKI-user record is rejected with
    /// `BadMessageCheck`, driven all the way through `run`.
    #[tokio::test]
    async fn run_rejects_a_request_for_an_unknown_transaction() {
        let store = store_with_user("txn-known", "correct-horse-battery-staple");
        let ca_key = test_ca_key();
        let ca_recipient = Identifier::from_digest([42u8; 20]);
        let txn = ScepTransaction::new(&store, &ca_key, ca_recipient, 32, false);
        let ca_public_key = match ca_key.public_key() {
            crate::signature::VerifyingKey::Rsa(pk) => *pk,
        };

        let client_key = test_ca_key();
        let mut client = ClientTransaction::new(&client_key, "txn-unknown");
        client.materialize_ephemeral_signer().unwrap();

        let requested_key = test_client_public_key();
        let pkcs10 = build_test_pkcs10("test", &encode_rsa_spki(&requested_key));
        let request =
            client.build_request(&pkcs10, ca_recipient, ca_public_key, &[0u8; 16]).unwrap();

        let result = txn.run(&request).await.unwrap();
        assert_eq!(result.state, TransactionState::BuildError(FailInfo::BadMessageCheck));
    }
}
