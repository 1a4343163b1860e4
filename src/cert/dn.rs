//! Distinguished Name model (spec §2 glossary, §4.3, §9 "DN canonical
//! form").
//!
//! A DN is an ordered sequence of RDNs; each RDN is a set of
//! `{attributeType, value}` pairs. Equality for lookup purposes is
//! byte-exact against whatever was actually on the wire, so every
//! [`DistinguishedName`] keeps the verbatim encoded bytes it was parsed
//! from (or, for one it builds itself, the canonical encoding it produces)
//! alongside the parsed structure.

use crate::asn1::stream::{ByteStream, ByteWriter};
use crate::asn1::AsnString;
use crate::config::Config;
use crate::error::CoreError;

use crate::asn1::tag;

/// One `AttributeTypeAndValue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTypeAndValue {
    /// Attribute type OID, dotted-arc form.
    pub attr_type: Vec<u32>,
    /// Attribute value.
    pub value: AsnString,
}

/// One RDN: a non-empty set of attribute/value pairs (almost always a
/// single pair in practice, but DER allows a true set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    /// The attribute/value pairs making up this RDN.
    pub entries: Vec<AttributeTypeAndValue>,
}

/// A parsed Distinguished Name, with the exact bytes it was built from or
/// parsed from retained for byte-exact lookup comparisons.
#[derive(Debug, Clone)]
pub struct DistinguishedName {
    /// Ordered RDNs, outermost (least-significant, typically `C`) first.
    pub rdns: Vec<RelativeDistinguishedName>,
    /// The verbatim DER encoding this value was parsed from, or its own
    /// canonical encoding if it was constructed rather than parsed.
    pub encoded: Vec<u8>,
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        // Byte-exact per spec §4.3: equality for lookup purposes is on
        // the wire bytes, not on a semantic re-comparison of the parsed
        // structure.
        self.encoded == other.encoded
    }
}
impl Eq for DistinguishedName {}

impl DistinguishedName {
    /// Build a DN from RDNs, producing it in canonical form (RDNs sorted
    /// by attribute-type OID bytes ascending; within an RDN,
    /// `AttributeTypeAndValue` entries sorted by DER-encoded value).
    pub fn build(mut rdns: Vec<RelativeDistinguishedName>) -> crate::error::Result<Self> {
        for rdn in &mut rdns {
            rdn.entries.sort_by(|a, b| encode_atv(a).cmp(&encode_atv(b)));
        }
        rdns.sort_by(|a, b| {
            let a_oid = a.entries.first().map(|e| e.attr_type.clone()).unwrap_or_default();
            let b_oid = b.entries.first().map(|e| e.attr_type.clone()).unwrap_or_default();
            encode_oid_bytes(&a_oid).cmp(&encode_oid_bytes(&b_oid))
        });
        let encoded = encode_rdns(&rdns)?;
        Ok(Self { rdns, encoded })
    }

    /// Parse a DN from its DER `Name` encoding (a `SEQUENCE OF RDNSequence`).
    pub fn parse(bytes: &[u8], config: &Config) -> crate::error::Result<Self> {
        let mut r = ByteStream::new(bytes);
        let len = r.read_sequence_header()?.ok_or_else(|| {
            CoreError::bad_data("Name must use definite-length encoding")
        })?;
        let mut rdns = Vec::new();
        let start_remaining = r.remaining();
        while start_remaining - r.remaining() < len {
            let rdn = parse_rdn(&mut r, config)?;
            rdns.push(rdn);
        }
        Ok(Self { rdns, encoded: bytes.to_vec() })
    }

    /// Look up the value of the first attribute matching `oid`, if any
    /// (e.g. `&[2,5,4,3]` for `commonName`).
    pub fn attribute(&self, oid: &[u32]) -> Option<&str> {
        self.rdns
            .iter()
            .flat_map(|rdn| rdn.entries.iter())
            .find(|atv| atv.attr_type == oid)
            .map(|atv| atv.value.text.as_str())
    }

    /// The `commonName` attribute, if present.
    pub fn common_name(&self) -> Option<&str> {
        self.attribute(&[2, 5, 4, 3])
    }
}

fn parse_rdn(r: &mut ByteStream, config: &Config) -> crate::error::Result<RelativeDistinguishedName> {
    let set_len = r.read_constructed(tag::SET_TAG)?.ok_or_else(|| {
        CoreError::bad_data("RelativeDistinguishedName must use definite-length encoding")
    })?;
    let mut entries = Vec::new();
    let start = r.remaining();
    while start - r.remaining() < set_len {
        let _seq_len = r.read_sequence_header()?;
        let attr_type = r.read_oid()?;
        let value = AsnString::read(r, config)?;
        entries.push(AttributeTypeAndValue { attr_type, value });
    }
    if entries.is_empty() {
        return Err(CoreError::bad_data("RDN must contain at least one attribute"));
    }
    Ok(RelativeDistinguishedName { entries })
}

fn encode_atv(atv: &AttributeTypeAndValue) -> Vec<u8> {
    let mut body = ByteWriter::new();
    let _ = body.write_oid(&atv.attr_type);
    atv.value.write(&mut body);
    let body_bytes = body.into_bytes();
    let mut w = ByteWriter::new();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    w.into_bytes()
}

fn encode_oid_bytes(arcs: &[u32]) -> Vec<u8> {
    crate::asn1::stream::encode_oid_arcs(arcs).unwrap_or_default()
}

fn encode_rdns(rdns: &[RelativeDistinguishedName]) -> crate::error::Result<Vec<u8>> {
    let mut body = ByteWriter::new();
    for rdn in rdns {
        let mut set_body = ByteWriter::new();
        for atv in &rdn.entries {
            set_body.push_raw(&encode_atv(atv));
        }
        let set_bytes = set_body.into_bytes();
        body.write_header(tag::SET_TAG, set_bytes.len());
        body.push_raw(&set_bytes);
    }
    let body_bytes = body.into_bytes();
    let mut w = ByteWriter::new();
    w.write_sequence_header(body_bytes.len());
    w.push_raw(&body_bytes);
    Ok(w.into_bytes())
}

/// Build a simple single-RDN-per-attribute DN from `(OID, value)` pairs,
/// in the order given — convenience constructor for tests and for the
/// client side of certificate request generation.
pub fn simple_dn(pairs: &[(&[u32], &str)]) -> crate::error::Result<DistinguishedName> {
    let rdns = pairs
        .iter()
        .map(|(oid, value)| RelativeDistinguishedName {
            entries: vec![AttributeTypeAndValue {
                attr_type: oid.to_vec(),
                value: AsnString::new(*value),
            }],
        })
        .collect();
    DistinguishedName::build(rdns)
}

/// Common attribute-type OIDs used when building DNs.
pub mod oid {
    /// `commonName`
    pub const COMMON_NAME: &[u32] = &[2, 5, 4, 3];
    /// `countryName`
    pub const COUNTRY_NAME: &[u32] = &[2, 5, 4, 6];
    /// `organizationName`
    pub const ORGANIZATION_NAME: &[u32] = &[2, 5, 4, 10];
    /// `organizationalUnitName`
    pub const ORGANIZATIONAL_UNIT_NAME: &[u32] = &[2, 5, 4, 11];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sorts_rdns_by_oid_bytes() {
        let dn = simple_dn(&[
            (oid::COMMON_NAME, "test"),
            (oid::COUNTRY_NAME, "US"),
        ])
        .unwrap();
        // countryName (2.5.4.6) encodes to a smaller OID byte string head
        // than commonName (2.5.4.3)? No: 4.3 < 4.6, so commonName sorts
        // first; assert the actual ordering this produces.
        let first_oid = &dn.rdns[0].entries[0].attr_type;
        assert_eq!(first_oid, &oid::COMMON_NAME.to_vec());
    }

    #[test]
    fn parse_round_trips_build() {
        let config = Config::default();
        let dn = simple_dn(&[(oid::COMMON_NAME, "test.example.com")]).unwrap();
        let parsed = DistinguishedName::parse(&dn.encoded, &config).unwrap();
        assert_eq!(parsed.common_name(), Some("test.example.com"));
        assert_eq!(parsed, dn);
    }

    #[test]
    fn equality_is_byte_exact_on_encoded_form() {
        let config = Config::default();
        let a = simple_dn(&[(oid::COMMON_NAME, "test")]).unwrap();
        let b = DistinguishedName::parse(&a.encoded, &config).unwrap();
        assert_eq!(a, b);
    }
}
