//! ASN.1 string-type coercion (spec §4.2).
//!
//! On write, a string value is always tagged with the narrowest type that
//! can hold it faithfully: `PrintableString` if every character is in its
//! restricted alphabet, else `IA5String` if it's plain ASCII, else
//! `T61String` if every character fits in a single Latin-1 octet, else
//! `BMPString` if every character fits in 16 bits, else `UTF8String`.
//!
//! On read, a decoded `BMPString` whose content turns out to use only the
//! low 256 code points is still accepted: the wire tag doesn't have to
//! have been chosen narrowest by the peer. `T61String` decode additionally
//! understands the Deutsche Telekom umlaut quirk (a standalone diaeresis
//! combining octet immediately followed by the base vowel), gated by
//! [`crate::config::Config::t61_umlaut_quirks`]. `UTF8String` decode is
//! canonical-only: overlong sequences and non-BMP (4-byte) sequences are
//! rejected rather than silently accepted.

use crate::config::Config;
use crate::error::CoreError;

use super::stream::{ByteStream, ByteWriter};
use super::tag;

/// Which ASN.1 string tag a value was read from, or will be written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    /// `PrintableString` (0x13): `A-Za-z0-9 '()+,-./:=?` only.
    Printable,
    /// `IA5String` (0x16): 7-bit ASCII.
    Ia5,
    /// `T61String` (0x14): treated as Latin-1 (ISO 8859-1) octets here,
    /// with the umlaut-quirk exception during decode.
    T61,
    /// `BMPString` (0x1E): big-endian UTF-16 code units restricted to the
    /// Basic Multilingual Plane (no surrogate pairs).
    Bmp,
    /// `UTF8String` (0x0C).
    Utf8,
}

impl StringKind {
    fn wire_tag(self) -> u8 {
        let num = match self {
            StringKind::Printable => tag::PRINTABLE_STRING,
            StringKind::Ia5 => tag::IA5_STRING,
            StringKind::T61 => tag::T61_STRING,
            StringKind::Bmp => tag::BMP_STRING,
            StringKind::Utf8 => tag::UTF8_STRING,
        };
        tag::CLASS_UNIVERSAL | num
    }

    fn from_wire_tag(t: u8) -> crate::error::Result<Self> {
        let num = tag::tag_number(t);
        Ok(match num {
            tag::PRINTABLE_STRING => StringKind::Printable,
            tag::IA5_STRING => StringKind::Ia5,
            tag::T61_STRING => StringKind::T61,
            tag::BMP_STRING => StringKind::Bmp,
            tag::UTF8_STRING => StringKind::Utf8,
            _ => return Err(CoreError::bad_data(format!("unrecognised string tag 0x{t:02x}"))),
        })
    }
}

/// A decoded or to-be-encoded ASN.1 string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnString {
    /// The value, always held as a Rust `String` regardless of wire kind.
    pub text: String,
}

impl AsnString {
    /// Wrap a plain string for encoding.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The narrowest wire kind this value can be faithfully written as.
    pub fn narrowest_kind(&self) -> StringKind {
        if self.text.chars().all(is_printable_char) {
            StringKind::Printable
        } else if self.text.is_ascii() {
            StringKind::Ia5
        } else if self.text.chars().all(|c| (c as u32) <= 0xFF) {
            StringKind::T61
        } else if self.text.chars().all(|c| (c as u32) <= 0xFFFF) {
            StringKind::Bmp
        } else {
            StringKind::Utf8
        }
    }

    /// Write this value tagged with its narrowest faithful kind.
    pub fn write(&self, w: &mut ByteWriter) {
        let kind = self.narrowest_kind();
        let content = encode_content(&self.text, kind);
        w.write_header(kind.wire_tag(), content.len());
        w.push_raw(&content);
    }

    /// `sizeof` this value if written with [`AsnString::write`].
    pub fn sizeof(&self) -> usize {
        let kind = self.narrowest_kind();
        let content = encode_content(&self.text, kind);
        ByteWriter::sizeof_tlv(content.len())
    }

    /// Read a string value, dispatching on its wire tag.
    pub fn read(r: &mut ByteStream, config: &Config) -> crate::error::Result<Self> {
        let (t, len) = r.read_header()?;
        let kind = StringKind::from_wire_tag(t)?;
        let len = len.ok_or_else(|| CoreError::bad_data("indefinite-length string not supported"))?;
        let raw = r.read_bytes(len)?;
        let text = decode_content(&raw, kind, config)?;
        Ok(AsnString { text })
    }
}

fn is_printable_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " '()+,-./:=?".contains(c)
}

fn encode_content(text: &str, kind: StringKind) -> Vec<u8> {
    match kind {
        StringKind::Printable | StringKind::Ia5 => text.as_bytes().to_vec(),
        StringKind::T61 => text.chars().map(|c| c as u32 as u8).collect(),
        StringKind::Bmp => {
            let mut out = Vec::with_capacity(text.chars().count() * 2);
            for c in text.chars() {
                let u = c as u32 as u16;
                out.extend_from_slice(&u.to_be_bytes());
            }
            out
        }
        // UTF8String write is a byte-exact passthrough: the content is
        // already valid UTF-8, so no transformation is needed.
        StringKind::Utf8 => text.as_bytes().to_vec(),
    }
}

fn decode_content(raw: &[u8], kind: StringKind, config: &Config) -> crate::error::Result<String> {
    match kind {
        StringKind::Printable => {
            let s = std::str::from_utf8(raw)
                .map_err(|_| CoreError::bad_data("PrintableString is not valid ASCII"))?;
            if !s.chars().all(is_printable_char) {
                return Err(CoreError::bad_data("PrintableString contains disallowed characters"));
            }
            Ok(s.to_string())
        }
        StringKind::Ia5 => {
            if !raw.is_ascii() {
                return Err(CoreError::bad_data("IA5String contains non-ASCII octets"));
            }
            Ok(raw.iter().map(|&b| b as char).collect())
        }
        StringKind::T61 => decode_t61(raw, config),
        StringKind::Bmp => decode_bmp(raw),
        StringKind::Utf8 => decode_utf8_canonical(raw),
    }
}

/// T.61 diaeresis combining octet, as emitted by legacy Deutsche Telekom
/// directory tooling instead of the precomposed umlaut character.
const T61_DIAERESIS: u8 = 0xC8;

/// The six base-vowel pairs the diaeresis quirk collapses, in original
/// (base-char, precomposed) form.
const T61_UMLAUT_PAIRS: [(u8, char); 6] =
    [(b'a', 'ä'), (b'o', 'ö'), (b'u', 'ü'), (b'A', 'Ä'), (b'O', 'Ö'), (b'U', 'Ü')];

fn decode_t61(raw: &[u8], config: &Config) -> crate::error::Result<String> {
    let quirks = config.t61_umlaut_quirks();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if quirks && b == T61_DIAERESIS && i + 1 < raw.len() {
            let base = raw[i + 1];
            if let Some((_, precomposed)) = T61_UMLAUT_PAIRS.iter().find(|(v, _)| *v == base) {
                out.push(*precomposed);
                i += 2;
                continue;
            }
        }
        out.push(b as char);
        i += 1;
    }
    Ok(out)
}

fn decode_bmp(raw: &[u8]) -> crate::error::Result<String> {
    if raw.len() % 2 != 0 {
        return Err(CoreError::bad_data("BMPString content has odd length"));
    }
    let mut out = String::with_capacity(raw.len() / 2);
    for chunk in raw.chunks_exact(2) {
        let unit = u16::from_be_bytes([chunk[0], chunk[1]]);
        if (0xD800..=0xDFFF).contains(&unit) {
            return Err(CoreError::bad_data("BMPString contains a surrogate code unit"));
        }
        out.push(char::from_u32(unit as u32).ok_or_else(|| CoreError::bad_data("invalid BMPString code unit"))?);
    }
    Ok(out)
}

/// Decode UTF-8 accepting only the canonical, shortest encoding for each
/// code point and rejecting any 4-byte (non-BMP) sequence.
fn decode_utf8_canonical(raw: &[u8]) -> crate::error::Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b0 = raw[i];
        if b0 & 0x80 == 0 {
            out.push(b0 as char);
            i += 1;
            continue;
        }
        let (len, min_cp, mut cp) = if b0 & 0xE0 == 0xC0 {
            (2usize, 0x80u32, (b0 & 0x1F) as u32)
        } else if b0 & 0xF0 == 0xE0 {
            (3, 0x800, (b0 & 0x0F) as u32)
        } else if b0 & 0xF8 == 0xF0 {
            return Err(CoreError::bad_data("non-BMP (4-byte) UTF-8 sequence rejected"));
        } else {
            return Err(CoreError::bad_data("invalid UTF-8 leading byte"));
        };
        if i + len > raw.len() {
            return Err(CoreError::bad_data("truncated UTF-8 sequence"));
        }
        for &cont in &raw[i + 1..i + len] {
            if cont & 0xC0 != 0x80 {
                return Err(CoreError::bad_data("invalid UTF-8 continuation byte"));
            }
            cp = (cp << 6) | (cont & 0x3F) as u32;
        }
        if cp < min_cp {
            return Err(CoreError::bad_data("overlong UTF-8 sequence rejected"));
        }
        if (0xD800..=0xDFFF).contains(&cp) {
            return Err(CoreError::bad_data("UTF-8 encodes a surrogate code point"));
        }
        out.push(char::from_u32(cp).ok_or_else(|| CoreError::bad_data("invalid UTF-8 code point"))?);
        i += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str, config: &Config) -> AsnString {
        let s = AsnString::new(text);
        let mut w = ByteWriter::new();
        s.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        AsnString::read(&mut r, config).unwrap()
    }

    #[test]
    fn printable_stays_printable() {
        let s = AsnString::new("Widget Corp");
        assert_eq!(s.narrowest_kind(), StringKind::Printable);
    }

    #[test]
    fn ascii_with_punctuation_falls_back_to_ia5() {
        let s = AsnString::new("user@example.com");
        assert_eq!(s.narrowest_kind(), StringKind::Ia5);
    }

    #[test]
    fn latin1_falls_back_to_t61() {
        let s = AsnString::new("Müller");
        assert_eq!(s.narrowest_kind(), StringKind::T61);
    }

    #[test]
    fn wide_chars_use_bmp() {
        let s = AsnString::new("日本語");
        assert_eq!(s.narrowest_kind(), StringKind::Bmp);
    }

    #[test]
    fn bmp_round_trips_as_narrower_when_content_allows() {
        // Content only uses code points below 256, so even though we write
        // it as T61 (narrowest), a peer-supplied BMPString with the same
        // content still decodes to the same text.
        let config = Config::default();
        let mut w = ByteWriter::new();
        w.write_header(tag::CLASS_UNIVERSAL | tag::BMP_STRING, 4);
        w.push_raw(&[0x00, b'a', 0x00, b'b']);
        let bytes = w.into_bytes();
        let mut r = ByteStream::new(&bytes);
        let decoded = AsnString::read(&mut r, &config).unwrap();
        assert_eq!(decoded.text, "ab");
    }

    #[test]
    fn t61_umlaut_quirk_collapses_when_enabled() {
        let config = Config::default();
        assert!(config.t61_umlaut_quirks());
        let raw = [b'M', T61_DIAERESIS, b'u', b'l', b'l', b'e', b'r'];
        let decoded = decode_t61(&raw, &config).unwrap();
        assert_eq!(decoded, "Müller");
    }

    #[test]
    fn t61_umlaut_quirk_disabled_keeps_raw_octets() {
        let mut config = Config::default();
        config.set(crate::config::OptionIndex::T61UmlautQuirks, crate::config::OptionValue::Bool(false));
        let raw = [b'M', T61_DIAERESIS, b'u'];
        let decoded = decode_t61(&raw, &config).unwrap();
        assert_eq!(decoded.chars().nth(1).unwrap() as u32, T61_DIAERESIS as u32);
    }

    #[test]
    fn utf8_rejects_overlong_encoding() {
        // Overlong encoding of U+002F ('/') as two bytes.
        let raw = [0xC0, 0xAF];
        assert!(decode_utf8_canonical(&raw).is_err());
    }

    #[test]
    fn utf8_rejects_four_byte_sequence() {
        let raw = [0xF0, 0x9F, 0x98, 0x80]; // U+1F600, non-BMP
        assert!(decode_utf8_canonical(&raw).is_err());
    }

    #[test]
    fn full_round_trip_preserves_text() {
        let config = Config::default();
        for text in ["Widget Corp", "user@example.com", "Müller", "日本語"] {
            let decoded = roundtrip(text, &config);
            assert_eq!(decoded.text, text);
        }
    }
}
