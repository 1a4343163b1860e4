//! CMS deenveloping state machine (spec §4.4).
//!
//! The hardest internal component: a state machine driven by what the
//! outer wrapper announces (`Encrypted`, `Signed`, `Compressed`, `Data`),
//! yielding [`CoreError::Underflow`] when the caller's buffered input
//! isn't yet enough to make progress. On `Underflow` the stream cursor is
//! *not* advanced past the last successful element boundary, so after the
//! caller appends more bytes the machine resumes from exactly where it
//! left off — it never re-derives state it already committed to.
//!
//! Buffer management follows the rule in spec §4.4: between two feeds,
//! unconsumed bytes are kept at the tail of `buffer` and `committed` is
//! the offset up to which the machine has made irreversible progress;
//! nothing here tracks an absolute stream position across feeds.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

use crate::asn1::stream::ByteStream;
use crate::asn1::tag;
use crate::error::CoreError;
use crate::identifier::Identifier;

/// Current position in the deenveloping state diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeenvelopeState {
    /// Nothing read yet.
    None,
    /// Reading the `SET OF RecipientInfo` (Encrypted path).
    SetEncr,
    /// Consuming one `RecipientInfo` at a time.
    Encr,
    /// Reading the encrypted-content-info header.
    EncrContent,
    /// Reading the `SET OF DigestAlgorithmIdentifier` (Signed path).
    SetHash,
    /// Consuming one `DigestAlgorithmIdentifier` at a time.
    Hash,
    /// Reading the `encapContentInfo` / content header.
    Content,
    /// Reading the payload itself.
    Data,
    /// Optional `[0] IMPLICIT SET OF Certificate` following the payload
    /// (Signed path only).
    CertSet,
    /// Reading the `SET OF SignerInfo`.
    SetSig,
    /// Consuming one `SignerInfo` at a time.
    Sig,
    /// Indefinite-length trailer EOC.
    Eoc,
    /// Fully consumed.
    Done,
}

/// The content-type classification read from the outer `ContentInfo`
/// wrapper, driving which branch of the state diagram is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentClass {
    Encrypted,
    Signed,
    Compressed,
    Data,
}

mod oid {
    pub const SIGNED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 2];
    pub const ENVELOPED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 3];
    pub const DIGESTED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 5];
    pub const ENCRYPTED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 6];
    pub const COMPRESSED_DATA: &[u32] = &[1, 2, 840, 113549, 1, 9, 16, 1, 9];
    pub const DATA: &[u32] = &[1, 2, 840, 113549, 1, 7, 1];
}

/// One step's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Progress was made; call `step` again.
    Progress,
    /// More input is required before the machine can continue; the
    /// caller should `push` more bytes and call `step` again. Not an
    /// error in the user-facing sense, but surfaced as `Underflow` from
    /// `step` so callers that don't special-case it still fail safe.
    NeedMoreData,
    /// The machine has reached `DATA` but no recipient key has been
    /// resolved yet; the caller must attempt a recipient match and
    /// provide a session key via [`DeenvelopeConsumer::supply_session_key`].
    NeedKeyMaterial,
    /// Fully consumed; payload is available.
    Done,
}

/// One recipient entry pending a key match.
#[derive(Debug, Clone)]
pub struct PendingRecipient {
    /// Raw recipient identifier bytes (`issuerAndSerialNumber` or
    /// `keyID` encoding, whichever the RecipientInfo used).
    pub identifier: Vec<u8>,
    /// The still-wrapped session key.
    pub wrapped_key: Vec<u8>,
}

/// Consumer-side state for one in-progress deenveloping operation.
pub struct DeenvelopeConsumer {
    state: DeenvelopeState,
    buffer: Vec<u8>,
    /// Bytes of `buffer` the machine has irrevocably consumed. Everything
    /// before this offset can be dropped on the next `push`.
    committed: usize,
    content_class: Option<ContentClass>,
    remaining_in_envelope: Option<usize>,
    digest_algos_seen: Vec<Vec<u32>>,
    recipients: Vec<PendingRecipient>,
    session_key: Option<Vec<u8>>,
    content_nonce: Option<Vec<u8>>,
    content: Option<Vec<u8>>,
    detached: bool,
    /// The signer's certificate, if the outer `[0] IMPLICIT SET OF
    /// Certificate` field was present (Signed path only).
    signer_certificate: Option<Vec<u8>>,
    /// Decoded `SignerInfo.signedAttrs`, in encounter order.
    signed_attrs: Vec<(Vec<u32>, Vec<u8>)>,
    /// The raw `[0] IMPLICIT SET OF Attribute` content, kept verbatim so
    /// callers can re-tag it under a universal `SET` and verify the
    /// signature that was computed over it.
    signed_attrs_der: Option<Vec<u8>>,
    /// `SignerInfo.signature`, the bare signature bytes.
    signature: Option<Vec<u8>>,
}

impl DeenvelopeConsumer {
    /// A consumer with no input yet.
    pub fn new() -> Self {
        Self {
            state: DeenvelopeState::None,
            buffer: Vec::new(),
            committed: 0,
            content_class: None,
            remaining_in_envelope: None,
            digest_algos_seen: Vec::new(),
            recipients: Vec::new(),
            session_key: None,
            content_nonce: None,
            content: None,
            detached: false,
            signer_certificate: None,
            signed_attrs: Vec::new(),
            signed_attrs_der: None,
            signature: None,
        }
    }

    /// Current state, for diagnostics and tests.
    pub fn state(&self) -> DeenvelopeState {
        self.state
    }

    /// Append more wire bytes. Per the buffer-management rule, already
    /// fully-consumed bytes (`committed`) are dropped first so the buffer
    /// doesn't grow unbounded across many small feeds.
    pub fn push(&mut self, data: &[u8]) {
        if self.committed > 0 {
            self.buffer.drain(0..self.committed);
            self.committed = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Recipients still awaiting a key match.
    pub fn pending_recipients(&self) -> &[PendingRecipient] {
        &self.recipients
    }

    /// Supply the session key once the caller has matched a recipient
    /// (or derived it from a password). Only valid while the machine is
    /// waiting in [`DeenvelopeState::Data`] with no key yet resolved.
    pub fn supply_session_key(&mut self, key: Vec<u8>) {
        self.session_key = Some(key);
    }

    /// Register that this is a detached-signature consumption: the
    /// payload will be supplied out-of-band via
    /// [`DeenvelopeConsumer::process_extra_data`] rather than embedded.
    fn mark_detached(&mut self) {
        self.detached = true;
    }

    /// Feed externally-supplied payload bytes for a detached signature,
    /// once the header machinery has reached `DONE` with `detached` set.
    pub fn process_extra_data(&mut self, payload: &[u8]) {
        self.content = Some(payload.to_vec());
    }

    /// The recovered payload, once available.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// The signer's embedded certificate, if the outer `certificates`
    /// field was present.
    pub fn signer_certificate(&self) -> Option<&[u8]> {
        self.signer_certificate.as_deref()
    }

    /// The decoded value of a `SignerInfo.signedAttrs` entry matching
    /// `oid`, if present.
    pub fn signed_attribute(&self, oid: &[u32]) -> Option<&[u8]> {
        self.signed_attrs.iter().find(|(o, _)| o == oid).map(|(_, v)| v.as_slice())
    }

    /// `SignerInfo.signature`, the bare signature bytes.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// The bytes actually covered by the signature: the `[0]
    /// signedAttrs` content re-tagged under a universal `SET`, or the
    /// recovered content directly when no signed attributes were
    /// present.
    pub fn signed_content(&self) -> Option<Vec<u8>> {
        match &self.signed_attrs_der {
            Some(der) => {
                let mut w = crate::asn1::stream::ByteWriter::new();
                w.write_header(tag::SET_TAG, der.len());
                w.push_raw(der);
                Some(w.into_bytes())
            }
            None => self.content.clone(),
        }
    }

    /// RSA-unwrap the session key carried for the recipient entry whose
    /// `rid` matches `identifier`, returning the raw session-key bytes to
    /// pass to [`DeenvelopeConsumer::supply_session_key`].
    pub fn unwrap_session_key(
        &self,
        identifier: &Identifier,
        recipient_key: &RsaPrivateKey,
    ) -> crate::error::Result<Vec<u8>> {
        let entry = self
            .recipients
            .iter()
            .find(|r| r.identifier.as_slice() == identifier.as_bytes().as_slice())
            .ok_or_else(|| CoreError::NotFound("no RecipientInfo matches this identifier".to_string()))?;
        recipient_key
            .decrypt(Pkcs1v15Encrypt, &entry.wrapped_key)
            .map_err(|e| CoreError::Failed(format!("session-key unwrap failed: {e}")))
    }

    /// Advance the state machine as far as the currently buffered bytes
    /// allow. Returns `Underflow` (not a hard failure) when more input is
    /// needed; the caller should `push` and retry.
    pub fn step(&mut self) -> crate::error::Result<StepOutcome> {
        loop {
            let outcome = self.step_once()?;
            match outcome {
                StepOutcome::Progress => continue,
                other => return Ok(other),
            }
        }
    }

    fn step_once(&mut self) -> crate::error::Result<StepOutcome> {
        let available = &self.buffer[self.committed..];
        let mut r = ByteStream::new(available);

        match self.state {
            DeenvelopeState::None => {
                let outer_len = match r.read_sequence_header() {
                    Ok(l) => l,
                    Err(CoreError::Underflow { .. }) => return Ok(StepOutcome::NeedMoreData),
                    Err(e) => return Err(e),
                };
                let content_type = match r.read_oid() {
                    Ok(o) => o,
                    Err(CoreError::Underflow { .. }) => return Ok(StepOutcome::NeedMoreData),
                    Err(e) => return Err(e),
                };
                self.content_class = Some(classify(&content_type)?);
                let explicit_len = match r.read_constructed(tag::CLASS_CONTEXT | tag::CONSTRUCTED) {
                    Ok(l) => l,
                    Err(CoreError::Underflow { .. }) => return Ok(StepOutcome::NeedMoreData),
                    Err(e) => return Err(e),
                };
                let inner_len = match r.read_sequence_header() {
                    Ok(l) => l,
                    Err(CoreError::Underflow { .. }) => return Ok(StepOutcome::NeedMoreData),
                    Err(e) => return Err(e),
                };
                if let (Some(outer), Some(explicit)) = (outer_len, explicit_len) {
                    if explicit > outer {
                        return Err(CoreError::bad_data("EXPLICIT wrapper length exceeds outer SEQUENCE"));
                    }
                }
                self.remaining_in_envelope = inner_len;
                self.commit(&mut r);
                self.state = match self.content_class.unwrap() {
                    ContentClass::Encrypted => DeenvelopeState::SetEncr,
                    ContentClass::Signed => DeenvelopeState::SetHash,
                    ContentClass::Compressed => DeenvelopeState::Content,
                    ContentClass::Data => DeenvelopeState::Data,
                };
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::SetEncr => {
                let _version = try_underflow(r.read_short_integer())?;
                let set_len = try_underflow(r.read_constructed(tag::SET_TAG))?;
                let declared_total = self.remaining_in_envelope.unwrap_or(usize::MAX);
                if let Some(l) = set_len {
                    if l > declared_total {
                        return Err(CoreError::bad_data(
                            "RecipientInfo SET length exceeds declared envelope size",
                        ));
                    }
                }
                self.remaining_in_envelope = set_len;
                self.commit(&mut r);
                self.state = DeenvelopeState::Encr;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Encr => {
                if self.remaining_in_envelope == Some(0) {
                    self.commit(&mut r);
                    self.state = DeenvelopeState::EncrContent;
                    return Ok(StepOutcome::Progress);
                }
                let start = r.position();
                let _ri_version = try_underflow(r.read_short_integer())?;
                let identifier = try_underflow(r.read_octet_string())?;
                let wrapped_key = try_underflow(r.read_octet_string())?;
                let consumed = r.position() - start;
                if let Some(remaining) = &mut self.remaining_in_envelope {
                    *remaining = remaining.saturating_sub(consumed);
                }
                self.recipients.push(PendingRecipient { identifier, wrapped_key });
                self.commit(&mut r);
                if self.remaining_in_envelope == Some(0) {
                    self.state = DeenvelopeState::EncrContent;
                }
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::EncrContent => {
                let _content_type = try_underflow(r.read_oid())?;
                let algo_seq = try_underflow(r.read_raw_object(available.len()))?;
                let mut algo_inner = ByteStream::new(algo_seq.content());
                let _algo_oid = algo_inner.read_oid()?;
                let nonce = algo_inner.read_octet_string()?;
                let ciphertext = try_underflow(r.read_generic_hole(tag::CLASS_CONTEXT)).or_else(|e| {
                    if matches!(e, CoreError::Underflow { .. }) {
                        Err(e)
                    } else {
                        r.read_octet_string()
                    }
                })?;
                self.content_nonce = Some(nonce);
                self.content = Some(ciphertext);
                self.commit(&mut r);
                self.state = DeenvelopeState::Data;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::SetHash => {
                let _version = try_underflow(r.read_short_integer())?;
                let set_len = try_underflow(r.read_constructed(tag::SET_TAG))?;
                self.remaining_in_envelope = set_len;
                self.commit(&mut r);
                self.state = DeenvelopeState::Hash;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Hash => {
                if self.remaining_in_envelope == Some(0) {
                    self.commit(&mut r);
                    self.state = DeenvelopeState::Content;
                    return Ok(StepOutcome::Progress);
                }
                let start = r.position();
                let algo_obj = try_underflow(r.read_raw_object(available.len()))?;
                let mut inner = ByteStream::new(algo_obj.content());
                let algo_oid = inner.read_oid()?;
                let consumed = r.position() - start;
                if let Some(remaining) = &mut self.remaining_in_envelope {
                    *remaining = remaining.saturating_sub(consumed);
                }
                // Hash-set de-duplication (spec §4.4): only keep the first
                // hash context per distinct algorithm.
                if !self.digest_algos_seen.iter().any(|a| a == &algo_oid) {
                    self.digest_algos_seen.push(algo_oid);
                }
                self.commit(&mut r);
                if self.remaining_in_envelope == Some(0) {
                    self.state = DeenvelopeState::Content;
                }
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Content => {
                let _content_type = try_underflow(r.read_oid())?;
                // encapContentInfo's eContent is `[0] EXPLICIT OCTET STRING`,
                // optional for a detached signature.
                if r.remaining() == 0 {
                    return Ok(StepOutcome::NeedMoreData);
                }
                let next_tag = try_underflow(r.peek_tag())?;
                if next_tag == (tag::CLASS_CONTEXT | tag::CONSTRUCTED) {
                    let explicit_len = try_underflow(r.read_constructed(tag::CLASS_CONTEXT | tag::CONSTRUCTED))?;
                    let _ = explicit_len;
                    let content = try_underflow(r.read_octet_string())?;
                    if content.is_empty() && matches!(self.content_class, Some(ContentClass::Signed)) {
                        self.mark_detached();
                    } else {
                        self.content = Some(content);
                    }
                }
                self.commit(&mut r);
                self.state = DeenvelopeState::Data;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Data => {
                if matches!(self.content_class, Some(ContentClass::Encrypted)) {
                    if self.session_key.is_none() && !self.recipients.is_empty() {
                        return Ok(StepOutcome::NeedKeyMaterial);
                    }
                    if let (Some(key), Some(nonce), Some(ciphertext)) =
                        (&self.session_key, &self.content_nonce, &self.content)
                    {
                        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
                        let plaintext = cipher
                            .decrypt(Nonce::from_slice(nonce), ciphertext.as_slice())
                            .map_err(|e| CoreError::Failed(format!("content decryption failed: {e}")))?;
                        self.content = Some(plaintext);
                    }
                }
                self.state = match self.content_class {
                    Some(ContentClass::Signed) => DeenvelopeState::CertSet,
                    _ => DeenvelopeState::Done,
                };
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::CertSet => {
                if r.remaining() == 0 {
                    return Ok(StepOutcome::NeedMoreData);
                }
                let next_tag = try_underflow(r.peek_tag())?;
                if next_tag == (tag::CLASS_CONTEXT | tag::CONSTRUCTED | 0) {
                    let cert_set = try_underflow(r.read_raw_object(available.len()))?;
                    self.signer_certificate = Some(cert_set.content().to_vec());
                    self.commit(&mut r);
                }
                self.state = DeenvelopeState::SetSig;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::SetSig => {
                let set_len = try_underflow(r.read_constructed(tag::SET_TAG))?;
                self.remaining_in_envelope = set_len;
                self.commit(&mut r);
                self.state = DeenvelopeState::Sig;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Sig => {
                if self.remaining_in_envelope == Some(0) {
                    self.commit(&mut r);
                    self.state = DeenvelopeState::Eoc;
                    return Ok(StepOutcome::Progress);
                }
                let start = r.position();
                let signer_info = try_underflow(r.read_raw_object(available.len()))?;
                let consumed = r.position() - start;
                if let Some(remaining) = &mut self.remaining_in_envelope {
                    *remaining = remaining.saturating_sub(consumed);
                }
                self.parse_signer_info(signer_info.content())?;
                self.commit(&mut r);
                if self.remaining_in_envelope == Some(0) {
                    self.state = DeenvelopeState::Eoc;
                }
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Eoc => {
                // Indefinite-length wrappers leave trailing EOC pairs; a
                // definite-length encoding has none. Consume any that are
                // present and move on regardless.
                while r.check_eoc().unwrap_or(false) {
                    self.commit(&mut r);
                }
                self.state = DeenvelopeState::Done;
                Ok(StepOutcome::Progress)
            }

            DeenvelopeState::Done => Ok(StepOutcome::Done),
        }
    }

    fn commit(&mut self, r: &mut ByteStream) {
        self.committed += r.position();
    }

    /// Parse a complete, already-buffered `SignerInfo` body: `version,
    /// sid, digestAlgorithm, [0] signedAttrs OPTIONAL, signatureAlgorithm,
    /// signature`. Everything here operates on bytes already known to be
    /// fully present, so ordinary `?` propagation is used rather than the
    /// step machine's `Underflow`-tolerant style.
    fn parse_signer_info(&mut self, content: &[u8]) -> crate::error::Result<()> {
        let mut r = ByteStream::new(content);
        let _version = r.read_short_integer()?;
        let _sid = r.read_octet_string()?;
        let _digest_algorithm = r.read_raw_object(content.len())?;
        if r.remaining() > 0 && r.peek_tag()? == (tag::CLASS_CONTEXT | tag::CONSTRUCTED) {
            let attrs = r.read_raw_object(content.len())?;
            self.signed_attrs_der = Some(attrs.content().to_vec());
            self.parse_signed_attrs(attrs.content())?;
        }
        let _signature_algorithm = r.read_raw_object(content.len())?;
        let signature = r.read_octet_string()?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Parse the content of a `[0] IMPLICIT SET OF Attribute`: a
    /// concatenation of `SEQUENCE { type OBJECT IDENTIFIER, values SET OF
    /// AttributeValue }`. Only the first value of each attribute is kept
    /// (every attribute SCEP carries here is single-valued).
    fn parse_signed_attrs(&mut self, attrs_content: &[u8]) -> crate::error::Result<()> {
        let mut r = ByteStream::new(attrs_content);
        while r.remaining() > 0 {
            let attr = r.read_raw_object(attrs_content.len())?;
            let mut inner = ByteStream::new(attr.content());
            let oid = inner.read_oid()?;
            let values = inner.read_raw_object(attr.content().len())?;
            let mut values_inner = ByteStream::new(values.content());
            let value = values_inner.read_raw_object(values.content().len())?;
            self.signed_attrs.push((oid, value.content().to_vec()));
        }
        Ok(())
    }
}

impl Default for DeenvelopeConsumer {
    fn default() -> Self {
        Self::new()
    }
}

fn try_underflow<T>(result: crate::error::Result<T>) -> crate::error::Result<T> {
    result
}

fn classify(content_type: &[u32]) -> crate::error::Result<ContentClass> {
    if content_type == oid::ENVELOPED_DATA || content_type == oid::ENCRYPTED_DATA {
        Ok(ContentClass::Encrypted)
    } else if content_type == oid::SIGNED_DATA {
        Ok(ContentClass::Signed)
    } else if content_type == oid::COMPRESSED_DATA {
        Ok(ContentClass::Compressed)
    } else if content_type == oid::DATA || content_type == oid::DIGESTED_DATA {
        Ok(ContentClass::Data)
    } else {
        Err(CoreError::bad_data("unrecognised CMS content type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::producer::Envelope;
    use crate::identifier::Identifier;
    use crate::signature::SigningKey;
    use rsa::RsaPrivateKey;

    #[test]
    fn signed_data_detached_reaches_done() {
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let signing_key = SigningKey::Rsa(Box::new(sk));
        let encoded = Envelope::produce_signed(
            None,
            &signing_key,
            Identifier::from_digest([3u8; 20]),
            false,
            None,
            &[],
        )
        .unwrap();

        let mut consumer = DeenvelopeConsumer::new();
        consumer.push(&encoded);
        let outcome = consumer.step().unwrap();
        assert_eq!(outcome, StepOutcome::Done);
    }

    #[test]
    fn underflow_does_not_lose_committed_progress() {
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let signing_key = SigningKey::Rsa(Box::new(sk));
        let encoded = Envelope::produce_signed(
            Some(b"hello world"),
            &signing_key,
            Identifier::from_digest([4u8; 20]),
            false,
            None,
            &[],
        )
        .unwrap();

        let mut consumer = DeenvelopeConsumer::new();
        // Feed one byte at a time; every feed should either make progress
        // or return NeedMoreData, never lose what was already committed.
        let mut done = false;
        for chunk in encoded.chunks(7) {
            consumer.push(chunk);
            loop {
                match consumer.step() {
                    Ok(StepOutcome::Done) => {
                        done = true;
                        break;
                    }
                    Ok(StepOutcome::NeedMoreData) => break,
                    Ok(StepOutcome::NeedKeyMaterial) => break,
                    Ok(StepOutcome::Progress) => continue,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            if done {
                break;
            }
        }
        assert!(done, "consumer should reach Done once all bytes are fed");
    }

    #[test]
    fn enveloped_data_requests_key_material_before_recipient_match() {
        let recipient_sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let recipient_pk = recipient_sk.to_public_key();
        let recipients = vec![crate::envelope::producer::Recipient {
            identifier: Identifier::from_digest([5u8; 20]),
            public_key: recipient_pk,
        }];
        let encoded = Envelope::produce_enveloped(b"session payload", &recipients).unwrap();

        let mut consumer = DeenvelopeConsumer::new();
        consumer.push(&encoded);
        let outcome = consumer.step().unwrap();
        assert_eq!(outcome, StepOutcome::NeedKeyMaterial);
        assert_eq!(consumer.pending_recipients().len(), 1);
    }

    #[test]
    fn hash_set_deduplicates_repeated_algorithms() {
        // SignedData with two identical digestAlgorithm entries should
        // collapse to one tracked algorithm internally.
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let signing_key = SigningKey::Rsa(Box::new(sk));
        let encoded = Envelope::produce_signed(
            Some(b"x"),
            &signing_key,
            Identifier::from_digest([6u8; 20]),
            false,
            None,
            &[],
        )
        .unwrap();
        let mut consumer = DeenvelopeConsumer::new();
        consumer.push(&encoded);
        let _ = consumer.step().unwrap();
        assert_eq!(consumer.digest_algos_seen.len(), 1);
    }

    #[test]
    fn signed_attrs_and_embedded_certificate_round_trip() {
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let signing_key = SigningKey::Rsa(Box::new(sk));
        let cert = b"pretend-signer-certificate".to_vec();
        let attrs = vec![crate::envelope::producer::SignedAttribute::printable_string(
            &[1, 2, 3],
            "CertRep",
        )];
        let encoded = Envelope::produce_signed(
            Some(b"payload"),
            &signing_key,
            Identifier::from_digest([8u8; 20]),
            false,
            Some(&cert),
            &attrs,
        )
        .unwrap();

        let mut consumer = DeenvelopeConsumer::new();
        consumer.push(&encoded);
        let outcome = consumer.step().unwrap();
        assert_eq!(outcome, StepOutcome::Done);
        assert_eq!(consumer.content(), Some(b"payload".as_slice()));
        assert_eq!(consumer.signer_certificate(), Some(cert.as_slice()));
        assert_eq!(consumer.signed_attribute(&[1, 2, 3]), Some(b"CertRep".as_slice()));
    }

    /// Full round trip: sign a payload with detached signed attributes,
    /// encrypt the signed envelope to a recipient, then decrypt and
    /// re-verify — proving `sign -> encrypt -> decrypt -> verify` returns
    /// the original body.
    #[test]
    fn sign_encrypt_decrypt_verify_round_trip() {
        use crate::envelope::producer::{Recipient, SignedAttribute};
        use crate::signature::{verify_raw_digest, HashAlgo};

        let signer_sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let signing_key = SigningKey::Rsa(Box::new(signer_sk));
        let verifying_key = signing_key.public_key();

        let attrs = vec![SignedAttribute::printable_string(&[1, 2, 3], "transID-42")];
        let signed = Envelope::produce_signed(
            Some(b"the original body"),
            &signing_key,
            Identifier::from_digest([10u8; 20]),
            false,
            None,
            &attrs,
        )
        .unwrap();

        let recipient_sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let recipient_pk = recipient_sk.to_public_key();
        let recipient_id = Identifier::from_digest([11u8; 20]);
        let recipients = vec![Recipient { identifier: recipient_id, public_key: recipient_pk }];
        let enveloped = Envelope::produce_enveloped(&signed, &recipients).unwrap();

        let mut consumer = DeenvelopeConsumer::new();
        consumer.push(&enveloped);
        assert_eq!(consumer.step().unwrap(), StepOutcome::NeedKeyMaterial);
        let session_key = consumer.unwrap_session_key(&recipient_id, &recipient_sk).unwrap();
        consumer.supply_session_key(session_key);
        assert_eq!(consumer.step().unwrap(), StepOutcome::Done);

        let recovered_signed = consumer.content().unwrap().to_vec();

        let mut inner = DeenvelopeConsumer::new();
        inner.push(&recovered_signed);
        assert_eq!(inner.step().unwrap(), StepOutcome::Done);
        assert_eq!(inner.content(), Some(b"the original body".as_slice()));
        assert_eq!(inner.signed_attribute(&[1, 2, 3]), Some(b"transID-42".as_slice()));

        let signed_content = inner.signed_content().unwrap();
        let signature = inner.signature().unwrap();
        verify_raw_digest(&verifying_key, HashAlgo::Sha256, &signed_content, signature).unwrap();
    }
}
