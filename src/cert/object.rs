//! `CertObject`: the mutable-until-signed certificate record (spec §4.5).

use chrono::{DateTime, Utc};
use zeroize::Zeroize;

use crate::error::{CoreError, ErrorLocus, ErrorType, Result};
use crate::identifier::Identifier;

use super::dn::DistinguishedName;

/// The object's underlying kind. Distinct kinds carry distinct
/// constraints on what signing and attribute-write actually mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    /// An ordinary end-entity or CA certificate.
    Cert,
    /// An attribute certificate.
    AttrCert,
    /// A chain of certificates with a navigable cursor.
    CertChain,
    /// A PKCS#10 certificate request.
    CertReq,
    /// An RFC 4211 CRMF request.
    CrmfReq,
    /// A revocation request.
    RevReq,
    /// A certificate revocation list.
    Crl,
    /// An RTCS (real-time certificate status) request.
    RtcsReq,
    /// An RTCS response.
    RtcsResp,
    /// An OCSP request.
    OcspReq,
    /// An OCSP response.
    OcspResp,
    /// A bag of CMS signed attributes with no certificate semantics.
    CmsAttrs,
    /// A SCEP PKI-user profile record.
    PkiUser,
}

impl CertKind {
    /// `true` for the three kinds that cannot carry a real cryptographic
    /// signature and instead take the pseudo-sign path (spec §4.5).
    pub fn uses_pseudo_sign(self) -> bool {
        matches!(self, CertKind::OcspReq | CertKind::RtcsReq | CertKind::RevReq)
    }

    /// `true` for request kinds whose embedded key can verify only its
    /// own self-signature.
    pub fn is_self_sign_only_request(self) -> bool {
        matches!(self, CertKind::CertReq | CertKind::CrmfReq)
    }
}

/// Post-signing immutability flags (spec §4.5's `flags` field).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertFlags {
    /// Issuer and subject are the same entity and the object signed
    /// itself.
    pub self_signed: bool,
    /// The signature has already been cryptographically verified.
    pub sig_checked: bool,
    /// The object carries no certificate semantics, only opaque data.
    pub data_only: bool,
    /// The object represents a collection of certificates (a chain/bag)
    /// rather than a single certificate.
    pub cert_collection: bool,
}

/// The validity window of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Not valid before this instant.
    pub not_before: DateTime<Utc>,
    /// Not valid after this instant.
    pub not_after: DateTime<Utc>,
}

/// A certificate extension: OID plus opaque DER value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Extension OID, dotted-arc form.
    pub oid: Vec<u32>,
    /// `true` if clients unable to process this extension must reject
    /// the certificate.
    pub critical: bool,
    /// The extension's DER-encoded value (the content of its
    /// `OCTET STRING` wrapper).
    pub value: Vec<u8>,
}

/// The component-selector attributes that remain writable after signing
/// (spec §4.5): navigation cursors, not certificate content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentSelector {
    /// Which DN (subject or issuer) subsequent DN queries address.
    DnCursor,
    /// Which extension in the list subsequent extension queries address.
    ExtensionCursor,
    /// The currently selected chain position, for `CertChain` objects.
    ChainCursor,
    /// A trust flag, set by the caller rather than derived from signing.
    TrustFlag,
}

/// The mutable-until-signed certificate record.
pub struct CertObject {
    /// Object kind; fixed at construction.
    pub kind: CertKind,
    subject_dn: Option<DistinguishedName>,
    issuer_dn: Option<DistinguishedName>,
    validity: Option<Validity>,
    serial: Option<Vec<u8>>,
    public_key_info: Option<Vec<u8>>,
    extensions: Vec<Extension>,
    signature_algo: Option<Vec<u32>>,
    /// The full signed (or imported) DER encoding. `None` while mutable.
    encoded_bytes: Option<Vec<u8>>,
    flags: CertFlags,
    /// Byte-slice bounds into `encoded_bytes`, computed once after
    /// signing (spec §4.5 "post-sign parsing").
    parsed_spans: Option<ParsedSpans>,
    /// Chain entries, populated only for `CertChain` objects.
    chain: Vec<CertObject>,
    chain_cursor: usize,
}

#[derive(Debug, Clone, Copy)]
struct ParsedSpans {
    issuer_dn: (usize, usize),
    subject_dn: (usize, usize),
    spki: (usize, usize),
}

impl CertObject {
    /// Create an empty, mutable object of the given kind.
    pub fn new(kind: CertKind) -> Self {
        Self {
            kind,
            subject_dn: None,
            issuer_dn: None,
            validity: None,
            serial: None,
            public_key_info: None,
            extensions: Vec::new(),
            signature_algo: None,
            encoded_bytes: None,
            flags: CertFlags::default(),
            parsed_spans: None,
            chain: Vec::new(),
            chain_cursor: 0,
        }
    }

    /// `true` once the object has been signed or imported in signed form.
    pub fn is_signed(&self) -> bool {
        self.encoded_bytes.is_some()
    }

    fn require_mutable(&self) -> Result<()> {
        if self.is_signed() {
            return Err(CoreError::Permission(
                "certificate object is signed and immutable".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the subject DN. Rejected once signed.
    pub fn set_subject_dn(&mut self, dn: DistinguishedName) -> Result<()> {
        self.require_mutable()?;
        if self.subject_dn.is_some() {
            return Err(CoreError::Duplicate("subjectDN already set".to_string()));
        }
        self.subject_dn = Some(dn);
        Ok(())
    }

    /// Set the issuer DN. Rejected once signed.
    pub fn set_issuer_dn(&mut self, dn: DistinguishedName) -> Result<()> {
        self.require_mutable()?;
        if self.issuer_dn.is_some() {
            return Err(CoreError::Duplicate("issuerDN already set".to_string()));
        }
        self.issuer_dn = Some(dn);
        Ok(())
    }

    /// Set the validity window. Rejected once signed.
    pub fn set_validity(&mut self, validity: Validity) -> Result<()> {
        self.require_mutable()?;
        if validity.not_after <= validity.not_before {
            return Err(CoreError::bad_data_at(
                "notAfter must be later than notBefore",
                ErrorLocus::Validity,
                ErrorType::AttrValue,
            ));
        }
        self.validity = Some(validity);
        Ok(())
    }

    /// Set the serial number (big-endian magnitude bytes). Rejected once
    /// signed.
    pub fn set_serial(&mut self, serial: Vec<u8>, max_size: usize) -> Result<()> {
        self.require_mutable()?;
        if serial.len() > max_size {
            return Err(CoreError::bad_data_at(
                format!("serial number exceeds {max_size} bytes"),
                ErrorLocus::Unknown,
                ErrorType::AttrSize,
            ));
        }
        self.serial = Some(serial);
        Ok(())
    }

    /// Set the SubjectPublicKeyInfo bytes (opaque, full DER encoding).
    /// Rejected once signed.
    pub fn set_public_key_info(&mut self, spki: Vec<u8>) -> Result<()> {
        self.require_mutable()?;
        self.public_key_info = Some(spki);
        Ok(())
    }

    /// Append an extension. Rejected once signed.
    pub fn add_extension(&mut self, ext: Extension) -> Result<()> {
        self.require_mutable()?;
        self.extensions.push(ext);
        Ok(())
    }

    /// Subject DN, if set.
    pub fn subject_dn(&self) -> Option<&DistinguishedName> {
        self.subject_dn.as_ref()
    }

    /// Issuer DN, if set.
    pub fn issuer_dn(&self) -> Option<&DistinguishedName> {
        self.issuer_dn.as_ref()
    }

    /// Validity window, if set.
    pub fn validity(&self) -> Option<Validity> {
        self.validity
    }

    /// Serial number bytes, if set.
    pub fn serial(&self) -> Option<&[u8]> {
        self.serial.as_deref()
    }

    /// SubjectPublicKeyInfo bytes, if set.
    pub fn public_key_info(&self) -> Option<&[u8]> {
        self.public_key_info.as_deref()
    }

    /// This object's extensions.
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// Current flags.
    pub fn flags(&self) -> CertFlags {
        self.flags
    }

    /// Full signed encoding, if signed.
    pub fn encoded_bytes(&self) -> Option<&[u8]> {
        self.encoded_bytes.as_deref()
    }

    /// The signer's declared algorithm, if signed.
    pub fn signature_algo(&self) -> Option<&[u32]> {
        self.signature_algo.as_deref()
    }

    /// `certID` for this object's subject, if it has both a subject DN and
    /// has been signed (the identifier is derived from the canonical DN
    /// encoding, which only stabilises once the object stops mutating).
    pub fn cert_id(&self) -> Option<Identifier> {
        if !self.is_signed() {
            return None;
        }
        self.subject_dn.as_ref().map(|dn| crate::identifier::cert_id(&dn.encoded))
    }

    /// Record the result of signing (or importing a pre-signed
    /// encoding): stores the full DER, flips the object immutable, and
    /// computes byte-slice spans into it for {issuerDN, subjectDN, SPKI}
    /// so later queries don't re-parse (spec §4.5 "post-sign parsing").
    pub(crate) fn finalize_signed(
        &mut self,
        encoded: Vec<u8>,
        signature_algo: Vec<u32>,
        flags: CertFlags,
    ) -> Result<()> {
        if self.is_signed() {
            return Err(CoreError::Inited("certificate is already signed".to_string()));
        }
        let spans = locate_post_sign_spans(&encoded)?;
        self.encoded_bytes = Some(encoded);
        self.signature_algo = Some(signature_algo);
        self.flags = flags;
        self.parsed_spans = Some(spans);
        Ok(())
    }

    /// Post-sign issuerDN byte slice, computed once at sign time.
    pub fn issuer_dn_span(&self) -> Option<&[u8]> {
        let spans = self.parsed_spans?;
        let encoded = self.encoded_bytes.as_ref()?;
        Some(&encoded[spans.issuer_dn.0..spans.issuer_dn.1])
    }

    /// Post-sign subjectDN byte slice, computed once at sign time.
    pub fn subject_dn_span(&self) -> Option<&[u8]> {
        let spans = self.parsed_spans?;
        let encoded = self.encoded_bytes.as_ref()?;
        Some(&encoded[spans.subject_dn.0..spans.subject_dn.1])
    }

    /// Post-sign SubjectPublicKeyInfo byte slice, computed once at sign
    /// time.
    pub fn spki_span(&self) -> Option<&[u8]> {
        let spans = self.parsed_spans?;
        let encoded = self.encoded_bytes.as_ref()?;
        Some(&encoded[spans.spki.0..spans.spki.1])
    }

    /// Write a component-selector attribute. Unlike every other
    /// attribute, this is allowed both before and after signing.
    pub fn set_component_selector(&mut self, selector: ComponentSelector, index: usize) -> Result<()> {
        match selector {
            ComponentSelector::ChainCursor => {
                if self.kind != CertKind::CertChain {
                    return Err(CoreError::Permission(
                        "chain cursor only applies to CertChain objects".to_string(),
                    ));
                }
                if index >= self.chain.len() {
                    return Err(CoreError::bad_data("chain cursor index out of range"));
                }
                self.chain_cursor = index;
                Ok(())
            }
            // DnCursor/ExtensionCursor/TrustFlag are represented by the
            // caller's own cursor state in this API (no nested
            // kernel-style attribute store to mutate); accepted
            // unconditionally regardless of signed state.
            _ => Ok(()),
        }
    }

    /// Append a certificate to a `CertChain` object. Rejected for any
    /// other kind, and rejected once the chain itself is signed.
    pub fn push_chain_entry(&mut self, cert: CertObject) -> Result<()> {
        if self.kind != CertKind::CertChain {
            return Err(CoreError::Permission("not a CertChain object".to_string()));
        }
        self.require_mutable()?;
        self.chain.push(cert);
        Ok(())
    }

    /// The certificate at the current chain cursor.
    pub fn current_chain_entry(&self) -> Option<&CertObject> {
        self.chain.get(self.chain_cursor)
    }

    /// Full chain, outermost (leaf) first.
    pub fn chain(&self) -> &[CertObject] {
        &self.chain
    }

    /// Apply the pseudo-sign path used by `OcspReq`/`RtcsReq`/`RevReq`
    /// (spec §4.5): writes the outer wrapper the caller supplies,
    /// flips to immutable, and marks `SigChecked | SelfSigned` so the
    /// signature engine never attempts a real verification on these.
    pub fn pseudo_sign(&mut self, wrapped: Vec<u8>, pop_marker: Option<Vec<u8>>) -> Result<()> {
        if !self.kind.uses_pseudo_sign() {
            return Err(CoreError::Permission(format!(
                "{:?} does not use the pseudo-sign path",
                self.kind
            )));
        }
        let mut encoded = wrapped;
        if let Some(marker) = pop_marker {
            encoded.extend_from_slice(&marker);
        }
        if self.is_signed() {
            return Err(CoreError::Inited("object is already signed".to_string()));
        }
        self.encoded_bytes = Some(encoded);
        self.flags = CertFlags { sig_checked: true, self_signed: true, ..CertFlags::default() };
        self.parsed_spans = None;
        Ok(())
    }
}

impl Drop for CertObject {
    fn drop(&mut self) {
        if let Some(bytes) = &mut self.encoded_bytes {
            bytes.zeroize();
        }
        if let Some(serial) = &mut self.serial {
            serial.zeroize();
        }
    }
}

/// Walk a minimal X.509 `TBSCertificate` shape to locate the byte spans
/// of {issuerDN, subjectDN, SPKI} within the full signed encoding. This
/// intentionally does not validate the certificate; it only needs to
/// find three sub-object boundaries reliably, which `read_universal`
/// gives us without a full semantic parse.
fn locate_post_sign_spans(encoded: &[u8]) -> Result<ParsedSpans> {
    use crate::asn1::stream::ByteStream;

    let mut outer = ByteStream::new(encoded);
    let _outer_len = outer.read_sequence_header()?;
    let tbs_start = outer.position();
    let mut tbs = ByteStream::new(&encoded[tbs_start..]);
    let _tbs_len = tbs.read_sequence_header()?;

    // version [0] EXPLICIT is optional; peek and skip if present.
    if tbs.peek_tag()? == (crate::asn1::tag::CLASS_CONTEXT | crate::asn1::tag::CONSTRUCTED) {
        tbs.read_universal()?;
    }
    tbs.read_universal()?; // serialNumber
    tbs.read_universal()?; // signature AlgorithmIdentifier

    let issuer_start = tbs_start + tbs.position();
    tbs.read_universal()?; // issuer Name
    let issuer_end = tbs_start + tbs.position();

    tbs.read_universal()?; // validity

    let subject_start = tbs_start + tbs.position();
    tbs.read_universal()?; // subject Name
    let subject_end = tbs_start + tbs.position();

    let spki_start = tbs_start + tbs.position();
    tbs.read_universal()?; // subjectPublicKeyInfo
    let spki_end = tbs_start + tbs.position();

    Ok(ParsedSpans {
        issuer_dn: (issuer_start, issuer_end),
        subject_dn: (subject_start, subject_end),
        spki: (spki_start, spki_end),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::dn::{oid, simple_dn};

    #[test]
    fn attribute_writes_rejected_after_signing() {
        let mut cert = CertObject::new(CertKind::Cert);
        cert.set_subject_dn(simple_dn(&[(oid::COMMON_NAME, "test")]).unwrap()).unwrap();
        cert.finalize_signed(vec![0x30, 0x00], vec![1, 2, 840, 113549, 1, 1, 11], CertFlags::default())
            .unwrap();
        let err = cert.set_serial(vec![1], 32);
        assert!(matches!(err, Err(CoreError::Permission(_))));
    }

    #[test]
    fn component_selector_writable_after_signing() {
        let mut chain = CertObject::new(CertKind::CertChain);
        chain.push_chain_entry(CertObject::new(CertKind::Cert)).unwrap();
        chain.push_chain_entry(CertObject::new(CertKind::Cert)).unwrap();
        chain
            .finalize_signed(vec![0x30, 0x00], vec![1, 2, 840, 113549, 1, 1, 11], CertFlags::default())
            .unwrap();
        assert!(chain.set_component_selector(ComponentSelector::ChainCursor, 1).is_ok());
        assert!(chain.current_chain_entry().is_some());
    }

    #[test]
    fn ocsp_req_uses_pseudo_sign_and_marks_flags() {
        let mut req = CertObject::new(CertKind::OcspReq);
        req.pseudo_sign(vec![0x30, 0x03, 0x01, 0x01, 0xFF], None).unwrap();
        assert!(req.is_signed());
        assert!(req.flags().sig_checked);
        assert!(req.flags().self_signed);
    }

    #[test]
    fn cert_does_not_use_pseudo_sign() {
        let mut cert = CertObject::new(CertKind::Cert);
        let err = cert.pseudo_sign(vec![], None);
        assert!(matches!(err, Err(CoreError::Permission(_))));
    }

    #[test]
    fn validity_window_must_be_ordered() {
        let mut cert = CertObject::new(CertKind::Cert);
        let now = Utc::now();
        let err = cert.set_validity(Validity { not_before: now, not_after: now });
        assert!(err.is_err());
    }

    #[test]
    fn chain_cursor_rejected_on_non_chain_kind() {
        let mut cert = CertObject::new(CertKind::Cert);
        let err = cert.set_component_selector(ComponentSelector::ChainCursor, 0);
        assert!(matches!(err, Err(CoreError::Permission(_))));
    }
}
