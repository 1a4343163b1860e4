//! `ByteStream`: a cursor over a byte buffer with a sticky error flag
//! (spec §4.1). Every read advances the cursor on success and leaves it
//! untouched on failure; once an error has been recorded, every further
//! call is a no-op that returns the same error.
//!
//! Grounded on `cryptlib/io/stream.c`'s `sMemConnect`/`sgetc`/`sread`
//! family: a stream there carries a `status` field that, once negative,
//! short-circuits every subsequent operation.

use crate::error::CoreError;

use super::tag;

/// A raw object as returned by [`ByteStream::read_raw_object`]: tag, the
/// decoded content length, and the full tag+length+value bytes verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    /// The tag octet.
    pub tag: u8,
    /// Length of the content (not including tag/length octets).
    pub content_len: usize,
    /// The complete encoding: tag, length, and content octets.
    pub bytes: Vec<u8>,
}

impl RawObject {
    /// The content octets only (excludes tag/length).
    pub fn content(&self) -> &[u8] {
        let header_len = self.bytes.len() - self.content_len;
        &self.bytes[header_len..]
    }
}

/// A read-only cursor over a byte buffer.
pub struct ByteStream<'a> {
    buf: &'a [u8],
    pos: usize,
    sticky: Option<CoreError>,
    /// When set, a short read returns the bytes actually available instead
    /// of `Underflow` (spec §4.1's "partial-read enabled" mode).
    pub partial_read: bool,
}

impl<'a> ByteStream<'a> {
    /// Wrap a byte slice for reading.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, sticky: None, partial_read: false }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes remaining after the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Rewind the cursor to an earlier position. Used by the deenveloping
    /// state machine to back out to the last successful element boundary
    /// after an `Underflow`.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
        self.sticky = None;
    }

    /// `true` once a sticky error has been recorded.
    pub fn has_error(&self) -> bool {
        self.sticky.is_some()
    }

    fn fail<T>(&mut self, err: CoreError) -> crate::error::Result<T> {
        let cloned = clone_error(&err);
        self.sticky = Some(err);
        Err(cloned)
    }

    fn check_sticky<T>(&self) -> Option<crate::error::Result<T>> {
        self.sticky.as_ref().map(|e| Err(clone_error(e)))
    }

    /// Read `n` raw bytes, or `Underflow` if fewer remain (unless
    /// `partial_read` is set, in which case whatever is available is
    /// returned and the caller must check the length itself).
    pub fn read_bytes(&mut self, n: usize) -> crate::error::Result<Vec<u8>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let available = self.remaining();
        if available < n {
            if self.partial_read {
                let out = self.buf[self.pos..].to_vec();
                self.pos = self.buf.len();
                return Ok(out);
            }
            return self.fail(CoreError::Underflow { needed: n, available });
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> crate::error::Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Peek the tag octet without consuming it.
    pub fn peek_tag(&mut self) -> crate::error::Result<u8> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        if self.remaining() < 1 {
            return self.fail(CoreError::Underflow { needed: 1, available: 0 });
        }
        Ok(self.buf[self.pos])
    }

    /// Read and consume the tag octet.
    pub fn read_tag(&mut self) -> crate::error::Result<u8> {
        self.read_byte()
    }

    /// Read a BER length field: short form (single byte, high bit clear),
    /// long form (`0x80 | n` followed by `n` big-endian length bytes), or
    /// indefinite (`0x80` alone, signalled as `None`).
    pub fn read_length(&mut self) -> crate::error::Result<Option<usize>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let first = self.read_byte()?;
        if first == tag::INDEFINITE_LENGTH {
            return Ok(None);
        }
        if first & 0x80 == 0 {
            return Ok(Some(first as usize));
        }
        let n_octets = (first & 0x7F) as usize;
        if n_octets == 0 || n_octets > std::mem::size_of::<usize>() {
            return self.fail(CoreError::bad_data(format!(
                "unsupported long-form length of {n_octets} octets"
            )));
        }
        let octets = self.read_bytes(n_octets)?;
        let mut len: usize = 0;
        for b in octets {
            len = (len << 8) | b as usize;
        }
        Ok(Some(len))
    }

    /// Check whether the next two bytes are an end-of-contents marker
    /// (`00 00`) for an indefinite-length construct, consuming them if so.
    pub fn check_eoc(&mut self) -> crate::error::Result<bool> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        if self.remaining() < 2 {
            return Ok(false);
        }
        if self.buf[self.pos..self.pos + 2] == tag::EOC {
            self.pos += 2;
            return Ok(true);
        }
        Ok(false)
    }

    /// Read a tag + length header and return `(tag, Some(len) | None-for-indefinite)`.
    pub fn read_header(&mut self) -> crate::error::Result<(u8, Option<usize>)> {
        let tag = self.read_tag()?;
        let len = self.read_length()?;
        Ok((tag, len))
    }

    /// Read a SEQUENCE header, verifying the tag, and return its declared
    /// length (`None` for indefinite).
    pub fn read_sequence_header(&mut self) -> crate::error::Result<Option<usize>> {
        let (t, len) = self.read_header()?;
        if t != tag::SEQUENCE_TAG {
            return self.fail(CoreError::bad_data(format!(
                "expected SEQUENCE tag 0x{:02x}, got 0x{t:02x}",
                tag::SEQUENCE_TAG
            )));
        }
        Ok(len)
    }

    /// Read a constructed object with an explicit expected tag (e.g. a
    /// `[0] IMPLICIT` or `SET`) and return its declared length.
    pub fn read_constructed(&mut self, expected_tag: u8) -> crate::error::Result<Option<usize>> {
        let (t, len) = self.read_header()?;
        if t != expected_tag {
            return self.fail(CoreError::bad_data(format!(
                "expected tag 0x{expected_tag:02x}, got 0x{t:02x}"
            )));
        }
        Ok(len)
    }

    /// Read one complete object (tag, length, value) verbatim, up to
    /// `max_len` total bytes. Definite-length only.
    pub fn read_raw_object(&mut self, max_len: usize) -> crate::error::Result<RawObject> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let start = self.pos;
        let (t, len) = self.read_header()?;
        let content_len = match len {
            Some(l) => l,
            None => return self.fail(CoreError::bad_data("indefinite length not allowed here")),
        };
        if content_len > max_len {
            return self.fail(CoreError::Overflow(format!(
                "object of {content_len} bytes exceeds max {max_len}"
            )));
        }
        let _content = self.read_bytes(content_len)?;
        let end = self.pos;
        Ok(RawObject { tag: t, content_len, bytes: self.buf[start..end].to_vec() })
    }

    /// Skip exactly one object (header + content), definite or
    /// indefinite, without interpreting it.
    pub fn read_universal(&mut self) -> crate::error::Result<()> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (_t, len) = self.read_header()?;
        match len {
            Some(l) => {
                self.read_bytes(l)?;
            }
            None => {
                // Indefinite: skip nested objects until an EOC pair.
                loop {
                    if self.check_eoc()? {
                        break;
                    }
                    self.read_universal()?;
                }
            }
        }
        Ok(())
    }

    /// Read a generic "hole": verify the tag equals `expected_tag` and
    /// return the raw content bytes without further interpretation
    /// (used for opaque SPKI / algorithm-parameter blobs).
    pub fn read_generic_hole(&mut self, expected_tag: u8) -> crate::error::Result<Vec<u8>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let start = self.pos;
        let (t, len) = self.read_header()?;
        if t != expected_tag {
            self.pos = start;
            return self.fail(CoreError::bad_data(format!(
                "expected tag 0x{expected_tag:02x}, got 0x{t:02x}"
            )));
        }
        match len {
            Some(l) => self.read_bytes(l),
            None => {
                let content_start = self.pos;
                loop {
                    if self.check_eoc()? {
                        break;
                    }
                    self.read_universal()?;
                }
                let content_end = self.pos - 2;
                Ok(self.buf[content_start..content_end].to_vec())
            }
        }
    }

    /// Read a `BOOLEAN`.
    pub fn read_boolean(&mut self) -> crate::error::Result<bool> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::BOOLEAN) {
            return self.fail(CoreError::bad_data("expected BOOLEAN tag"));
        }
        if len != Some(1) {
            return self.fail(CoreError::bad_data("BOOLEAN must have length 1"));
        }
        Ok(self.read_byte()? != 0)
    }

    /// Read `NULL`.
    pub fn read_null(&mut self) -> crate::error::Result<()> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::NULL) || len != Some(0) {
            return self.fail(CoreError::bad_data("expected NULL tag with length 0"));
        }
        Ok(())
    }

    /// Read a short (fits in `i64`) `INTEGER`.
    pub fn read_short_integer(&mut self) -> crate::error::Result<i64> {
        let bytes = self.read_integer_bytes()?;
        if bytes.len() > 8 {
            return self.fail(CoreError::bad_data("integer too large for short_integer"));
        }
        let negative = !bytes.is_empty() && bytes[0] & 0x80 != 0;
        let mut acc: i64 = if negative { -1 } else { 0 };
        for b in &bytes {
            acc = (acc << 8) | (*b as i64 & 0xFF);
        }
        Ok(acc)
    }

    /// Read an arbitrary-precision `INTEGER` as big-endian minimal-form
    /// bytes (sign-magnitude two's-complement, as DER requires).
    pub fn read_bignum(&mut self) -> crate::error::Result<Vec<u8>> {
        self.read_integer_bytes()
    }

    fn read_integer_bytes(&mut self) -> crate::error::Result<Vec<u8>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::INTEGER) {
            return self.fail(CoreError::bad_data("expected INTEGER tag"));
        }
        let len = len.ok_or(()).or_else(|_| {
            self.fail::<usize>(CoreError::bad_data("INTEGER cannot be indefinite length"))
        })?;
        if len == 0 {
            return self.fail(CoreError::bad_data("INTEGER must have at least one octet"));
        }
        self.read_bytes(len)
    }

    /// Read an `OCTET STRING` (definite length only).
    pub fn read_octet_string(&mut self) -> crate::error::Result<Vec<u8>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::OCTET_STRING) {
            return self.fail(CoreError::bad_data("expected OCTET STRING tag"));
        }
        match len {
            Some(l) => self.read_bytes(l),
            None => self.fail(CoreError::bad_data("indefinite OCTET STRING not supported here")),
        }
    }

    /// Read a `BIT STRING`, returning `(unused_bits, bytes)`.
    pub fn read_bit_string(&mut self) -> crate::error::Result<(u8, Vec<u8>)> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::BIT_STRING) {
            return self.fail(CoreError::bad_data("expected BIT STRING tag"));
        }
        let len = match len {
            Some(l) if l >= 1 => l,
            _ => return self.fail(CoreError::bad_data("BIT STRING must carry an unused-bits octet")),
        };
        let unused = self.read_byte()?;
        if unused > 7 {
            return self.fail(CoreError::bad_data("BIT STRING unused-bit count out of range"));
        }
        let data = self.read_bytes(len - 1)?;
        Ok((unused, data))
    }

    /// Read an `OBJECT IDENTIFIER` and decode it to dotted-arc form,
    /// looking up the caller-supplied table for a symbolic selector.
    pub fn read_oid_from_table<'t, T>(
        &mut self,
        table: &'t [(&'static [u32], T)],
    ) -> crate::error::Result<&'t T> {
        let arcs = self.read_oid()?;
        table
            .iter()
            .find(|(candidate, _)| candidate == &arcs.as_slice())
            .map(|(_, v)| v)
            .ok_or_else(|| CoreError::bad_data("OID not present in expected table"))
    }

    /// Read an `OBJECT IDENTIFIER` and decode to dotted-arc form.
    pub fn read_oid(&mut self) -> crate::error::Result<Vec<u32>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::OBJECT_IDENTIFIER) {
            return self.fail(CoreError::bad_data("expected OID tag"));
        }
        let len = match len {
            Some(l) if l > 0 => l,
            _ => return self.fail(CoreError::bad_data("OID must have nonzero length")),
        };
        let bytes = self.read_bytes(len)?;
        decode_oid_bytes(&bytes).map_err(|e| {
            // Sticky state was already advanced; surface without a second fail().
            e
        })
    }

    /// Read a `UTCTime` and parse as UTC (2-digit year, 1950-2049 pivot).
    pub fn read_utc_time(&mut self) -> crate::error::Result<chrono::DateTime<chrono::Utc>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::UTC_TIME) {
            return self.fail(CoreError::bad_data("expected UTCTime tag"));
        }
        let len = len.unwrap_or(0);
        let raw = self.read_bytes(len)?;
        let s = String::from_utf8(raw).map_err(|_| CoreError::bad_data("UTCTime is not ASCII"))?;
        parse_utc_time(&s)
    }

    /// Read a `GeneralizedTime` (4-digit year).
    pub fn read_generalized_time(&mut self) -> crate::error::Result<chrono::DateTime<chrono::Utc>> {
        if let Some(r) = self.check_sticky() {
            return r;
        }
        let (t, len) = self.read_header()?;
        if t != (tag::CLASS_UNIVERSAL | tag::GENERALIZED_TIME) {
            return self.fail(CoreError::bad_data("expected GeneralizedTime tag"));
        }
        let len = len.unwrap_or(0);
        let raw = self.read_bytes(len)?;
        let s = String::from_utf8(raw)
            .map_err(|_| CoreError::bad_data("GeneralizedTime is not ASCII"))?;
        parse_generalized_time(&s)
    }
}

fn clone_error(err: &CoreError) -> CoreError {
    // CoreError doesn't derive Clone (some variants wrap non-Clone library
    // errors); sticky re-delivery only needs the kind and message.
    match err {
        CoreError::BadData { detail, locus } => {
            CoreError::BadData { detail: detail.clone(), locus: *locus }
        }
        CoreError::Underflow { needed, available } => {
            CoreError::Underflow { needed: *needed, available: *available }
        }
        CoreError::Overflow(s) => CoreError::Overflow(s.clone()),
        CoreError::Signature(s) => CoreError::Signature(s.clone()),
        CoreError::NotInited(s) => CoreError::NotInited(s.clone()),
        CoreError::NotFound(s) => CoreError::NotFound(s.clone()),
        CoreError::Inited(s) => CoreError::Inited(s.clone()),
        CoreError::Duplicate(s) => CoreError::Duplicate(s.clone()),
        CoreError::Permission(s) => CoreError::Permission(s.clone()),
        CoreError::EnvelopeResource(s) => CoreError::EnvelopeResource(s.clone()),
        CoreError::Timeout(s) => CoreError::Timeout(s.clone()),
        CoreError::Read(s) => CoreError::Read(s.clone()),
        CoreError::Write(s) => CoreError::Write(s.clone()),
        CoreError::Open(s) => CoreError::Open(s.clone()),
        CoreError::Invalid(s) => CoreError::Invalid(s.clone()),
        CoreError::Failed(s) => CoreError::Failed(s.clone()),
        CoreError::Configuration(s) => CoreError::Configuration(s.clone()),
        _ => CoreError::Failed(err.to_string()),
    }
}

/// Decode base-128 OID content octets to dotted-arc form, enforcing the
/// arc-0/arc-1 range constraints from spec §4.1.
pub fn decode_oid_bytes(bytes: &[u8]) -> crate::error::Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(CoreError::bad_data("empty OID content"));
    }
    let mut arcs = Vec::new();
    let first = bytes[0];
    let (a0, a1) = if first < 40 {
        (0u32, first as u32)
    } else if first < 80 {
        (1u32, (first - 40) as u32)
    } else {
        (2u32, first as u32 - 80)
    };
    arcs.push(a0);
    arcs.push(a1);
    let mut value: u64 = 0;
    let mut idx = 1;
    while idx < bytes.len() {
        let b = bytes[idx];
        value = (value << 7) | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            if value > u32::MAX as u64 {
                return Err(CoreError::bad_data("OID arc exceeds u32"));
            }
            arcs.push(value as u32);
            value = 0;
        }
        idx += 1;
    }
    if value != 0 {
        return Err(CoreError::bad_data("truncated OID arc"));
    }
    if a0 > 2 || (a0 < 2 && a1 > 39) || (a0 == 2 && a1 > 175) {
        return Err(CoreError::bad_data("OID first two arcs out of range"));
    }
    Ok(arcs)
}

/// Encode dotted-arc OID form to base-128 content octets.
pub fn encode_oid_arcs(arcs: &[u32]) -> crate::error::Result<Vec<u8>> {
    if arcs.len() < 2 {
        return Err(CoreError::bad_data("OID needs at least two arcs"));
    }
    let (a0, a1) = (arcs[0], arcs[1]);
    if a0 > 2 || (a0 < 2 && a1 > 39) || (a0 == 2 && a1 > 175) {
        return Err(CoreError::bad_data("OID first two arcs out of range"));
    }
    let mut out = vec![(a0 * 40 + a1) as u8];
    for &arc in &arcs[2..] {
        out.extend(encode_base128(arc));
    }
    Ok(out)
}

fn encode_base128(mut value: u32) -> Vec<u8> {
    let mut groups = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    groups.reverse();
    groups
}

fn parse_utc_time(s: &str) -> crate::error::Result<chrono::DateTime<chrono::Utc>> {
    use chrono::{NaiveDateTime, TimeZone, Utc};
    let digits = s.trim_end_matches('Z');
    if digits.len() != 10 && digits.len() != 12 {
        return Err(CoreError::bad_data("UTCTime has unexpected length"));
    }
    let fmt = if digits.len() == 10 { "%y%m%d%H%M" } else { "%y%m%d%H%M%S" };
    let naive = NaiveDateTime::parse_from_str(digits, fmt)
        .map_err(|_| CoreError::bad_data("UTCTime does not parse"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn parse_generalized_time(s: &str) -> crate::error::Result<chrono::DateTime<chrono::Utc>> {
    use chrono::{NaiveDateTime, TimeZone, Utc};
    let digits = s.trim_end_matches('Z');
    if digits.len() != 14 {
        return Err(CoreError::bad_data("GeneralizedTime must be YYYYMMDDHHMMSSZ"));
    }
    let naive = NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .map_err(|_| CoreError::bad_data("GeneralizedTime does not parse"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// A write-only destination: either a growing buffer or a null sink that
/// only counts bytes (spec §4.1's "compute `sizeofObject` without
/// allocating").
pub enum WriteSink {
    /// Accumulate bytes into a `Vec`.
    Buffer(Vec<u8>),
    /// Discard bytes, only track the count.
    Null(usize),
}

/// A writer over a [`WriteSink`].
pub struct ByteWriter {
    sink: WriteSink,
}

impl ByteWriter {
    /// A writer that accumulates into a real buffer.
    pub fn new() -> Self {
        Self { sink: WriteSink::Buffer(Vec::new()) }
    }

    /// A writer that only counts bytes (for `sizeof_*` computations).
    pub fn null() -> Self {
        Self { sink: WriteSink::Null(0) }
    }

    /// Bytes written so far (or the running count, for a null sink).
    pub fn len(&self) -> usize {
        match &self.sink {
            WriteSink::Buffer(v) => v.len(),
            WriteSink::Null(n) => *n,
        }
    }

    /// `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the writer, returning the accumulated buffer (empty for a
    /// null sink).
    pub fn into_bytes(self) -> Vec<u8> {
        match self.sink {
            WriteSink::Buffer(v) => v,
            WriteSink::Null(_) => Vec::new(),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        match &mut self.sink {
            WriteSink::Buffer(v) => v.extend_from_slice(bytes),
            WriteSink::Null(n) => *n += bytes.len(),
        }
    }

    /// Append raw content bytes after a header written with
    /// [`ByteWriter::write_header`]. Used by callers (like the string
    /// coder) that compute their own content bytes rather than going
    /// through [`ByteWriter::write_tlv`].
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.push(bytes);
    }

    /// Write a raw length field (short or long form, DER-minimal).
    pub fn write_length(&mut self, len: usize) {
        if len < 0x80 {
            self.push(&[len as u8]);
            return;
        }
        let be = len.to_be_bytes();
        let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
        let octets = &be[first_nonzero..];
        self.push(&[0x80 | octets.len() as u8]);
        self.push(octets);
    }

    /// `sizeof` a length field without writing.
    pub fn sizeof_length(len: usize) -> usize {
        if len < 0x80 {
            1
        } else {
            let be = len.to_be_bytes();
            let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
            1 + (be.len() - first_nonzero)
        }
    }

    /// Write a tag + length header.
    pub fn write_header(&mut self, tag: u8, len: usize) {
        self.push(&[tag]);
        self.write_length(len);
    }

    /// Write a complete TLV object.
    pub fn write_tlv(&mut self, tag: u8, content: &[u8]) {
        self.write_header(tag, content.len());
        self.push(content);
    }

    /// `sizeof` a complete TLV object.
    pub fn sizeof_tlv(content_len: usize) -> usize {
        1 + Self::sizeof_length(content_len) + content_len
    }

    /// Write a `BOOLEAN`.
    pub fn write_boolean(&mut self, value: bool) {
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::BOOLEAN, &[if value { 0xFF } else { 0x00 }]);
    }

    /// Write `NULL`.
    pub fn write_null(&mut self) {
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::NULL, &[]);
    }

    /// Write a short integer (minimal two's-complement big-endian form).
    pub fn write_short_integer(&mut self, value: i64) {
        self.write_integer_bytes(&minimal_integer_bytes(value));
    }

    /// `sizeof` a short integer.
    pub fn sizeof_short_integer(value: i64) -> usize {
        Self::sizeof_tlv(minimal_integer_bytes(value).len())
    }

    /// Write a bignum given as big-endian magnitude bytes (a leading
    /// `0x00` is inserted if the magnitude's high bit is set, to keep the
    /// value positive per DER).
    pub fn write_bignum(&mut self, magnitude: &[u8]) {
        self.write_integer_bytes(&positive_integer_bytes(magnitude));
    }

    /// `sizeof` a bignum.
    pub fn sizeof_bignum(magnitude: &[u8]) -> usize {
        Self::sizeof_tlv(positive_integer_bytes(magnitude).len())
    }

    fn write_integer_bytes(&mut self, bytes: &[u8]) {
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::INTEGER, bytes);
    }

    /// Write an `OCTET STRING`.
    pub fn write_octet_string(&mut self, content: &[u8]) {
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::OCTET_STRING, content);
    }

    /// `sizeof` an `OCTET STRING`.
    pub fn sizeof_octet_string(content_len: usize) -> usize {
        Self::sizeof_tlv(content_len)
    }

    /// Write a `BIT STRING` given full bytes (zero unused bits).
    pub fn write_bit_string(&mut self, data: &[u8]) {
        let mut content = Vec::with_capacity(data.len() + 1);
        content.push(0);
        content.extend_from_slice(data);
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::BIT_STRING, &content);
    }

    /// Write an `OBJECT IDENTIFIER` from dotted-arc form.
    pub fn write_oid(&mut self, arcs: &[u32]) -> crate::error::Result<()> {
        let content = encode_oid_arcs(arcs)?;
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::OBJECT_IDENTIFIER, &content);
        Ok(())
    }

    /// `sizeof` an OID.
    pub fn sizeof_oid(arcs: &[u32]) -> crate::error::Result<usize> {
        Ok(Self::sizeof_tlv(encode_oid_arcs(arcs)?.len()))
    }

    /// Write a SEQUENCE header for a body of `content_len` bytes (caller
    /// writes the body separately, typically computed with a null writer
    /// first).
    pub fn write_sequence_header(&mut self, content_len: usize) {
        self.write_header(tag::SEQUENCE_TAG, content_len);
    }

    /// Write a `UTCTime`.
    pub fn write_utc_time(&mut self, when: chrono::DateTime<chrono::Utc>) {
        let s = when.format("%y%m%d%H%M%SZ").to_string();
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::UTC_TIME, s.as_bytes());
    }

    /// Write a `GeneralizedTime`.
    pub fn write_generalized_time(&mut self, when: chrono::DateTime<chrono::Utc>) {
        let s = when.format("%Y%m%d%H%M%SZ").to_string();
        self.write_tlv(tag::CLASS_UNIVERSAL | tag::GENERALIZED_TIME, s.as_bytes());
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn minimal_integer_bytes(value: i64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let be = value.to_be_bytes();
    let mut start = 0;
    while start < be.len() - 1 {
        let b = be[start];
        let next = be[start + 1];
        let sign_extends = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
        if sign_extends {
            start += 1;
        } else {
            break;
        }
    }
    be[start..].to_vec()
}

fn positive_integer_bytes(magnitude: &[u8]) -> Vec<u8> {
    let trimmed: Vec<u8> = {
        let mut i = 0;
        while i + 1 < magnitude.len() && magnitude[i] == 0 {
            i += 1;
        }
        magnitude[i..].to_vec()
    };
    if trimmed.is_empty() {
        return vec![0];
    }
    if trimmed[0] & 0x80 != 0 {
        let mut out = Vec::with_capacity(trimmed.len() + 1);
        out.push(0);
        out.extend_from_slice(&trimmed);
        out
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_header_round_trips() {
        let mut w = ByteWriter::new();
        w.write_sequence_header(5);
        w.push(&[1, 2, 3, 4, 5]);
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        let len = r.read_sequence_header().unwrap();
        assert_eq!(len, Some(5));
    }

    #[test]
    fn boolean_round_trips() {
        let mut w = ByteWriter::new();
        w.write_boolean(true);
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        assert!(r.read_boolean().unwrap());
    }

    #[test]
    fn short_integer_round_trips_negative_and_zero() {
        for v in [-1i64, 0, 1, 127, 128, -128, -129, 70000] {
            let mut w = ByteWriter::new();
            w.write_short_integer(v);
            let bytes = w.into_bytes();
            let mut r = ByteStream::new(&bytes);
            assert_eq!(r.read_short_integer().unwrap(), v, "value {v}");
        }
    }

    #[test]
    fn oid_round_trips() {
        let arcs = vec![1, 2, 840, 113549, 1, 1, 1]; // rsaEncryption
        let mut w = ByteWriter::new();
        w.write_oid(&arcs).unwrap();
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        assert_eq!(r.read_oid().unwrap(), arcs);
    }

    #[test]
    fn oid_rejects_out_of_range_first_arc() {
        let err = encode_oid_arcs(&[3, 0]);
        assert!(err.is_err());
    }

    #[test]
    fn underflow_then_resume() {
        let mut w = ByteWriter::new();
        w.write_octet_string(b"hello world");
        let bytes = w.into_bytes();

        let mut r = ByteStream::new(&bytes[..3]);
        let before = r.position();
        let err = r.read_octet_string();
        assert!(matches!(err, Err(CoreError::Underflow { .. })));
        assert_eq!(r.position(), before, "cursor must not advance on failure");
    }

    #[test]
    fn sticky_error_short_circuits() {
        let mut r = ByteStream::new(&[]);
        let _ = r.read_byte();
        assert!(r.has_error());
        let second = r.read_byte();
        assert!(second.is_err());
    }

    #[test]
    fn null_writer_matches_real_size() {
        let mut real = ByteWriter::new();
        real.write_octet_string(b"1234567890123456789012345678901234567890");
        let real_len = real.len();

        let mut null = ByteWriter::null();
        null.write_octet_string(b"1234567890123456789012345678901234567890");
        assert_eq!(null.len(), real_len);
        assert!(null.into_bytes().is_empty());
    }

    #[test]
    fn bit_string_round_trips() {
        let mut w = ByteWriter::new();
        w.write_bit_string(&[0xAB, 0xCD]);
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        let (unused, data) = r.read_bit_string().unwrap();
        assert_eq!(unused, 0);
        assert_eq!(data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn generalized_time_round_trips() {
        use chrono::TimeZone;
        let when = chrono::Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let mut w = ByteWriter::new();
        w.write_generalized_time(when);
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        assert_eq!(r.read_generalized_time().unwrap(), when);
    }

    #[test]
    fn indefinite_length_universal_skip() {
        // Constructed OCTET STRING, indefinite length, containing one
        // definite-length chunk, terminated by EOC.
        let mut inner = ByteWriter::new();
        inner.write_octet_string(b"chunk");
        let inner_bytes = inner.into_bytes();

        let mut bytes = vec![tag::CLASS_UNIVERSAL | tag::CONSTRUCTED | tag::OCTET_STRING, 0x80];
        bytes.extend_from_slice(&inner_bytes);
        bytes.extend_from_slice(&tag::EOC);
        bytes.extend_from_slice(b"trailing");

        let mut r = ByteStream::new(&bytes);
        r.read_universal().unwrap();
        assert_eq!(r.remaining(), b"trailing".len());
    }
}
