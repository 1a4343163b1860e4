//! BER/DER tag constants and the universal-tag table (spec §4.1).

/// Class bits of a BER tag octet.
pub const CLASS_UNIVERSAL: u8 = 0x00;
/// Application class.
pub const CLASS_APPLICATION: u8 = 0x40;
/// Context-specific class.
pub const CLASS_CONTEXT: u8 = 0x80;
/// Private class.
pub const CLASS_PRIVATE: u8 = 0xC0;

/// Constructed-encoding bit.
pub const CONSTRUCTED: u8 = 0x20;

/// Mask isolating the low 5 tag-number bits (high-tag-number form not
/// supported: every tag this crate needs fits in 5 bits).
pub const TAG_NUMBER_MASK: u8 = 0x1F;

pub const BOOLEAN: u8 = 0x01;
pub const INTEGER: u8 = 0x02;
pub const BIT_STRING: u8 = 0x03;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const OBJECT_IDENTIFIER: u8 = 0x06;
pub const ENUMERATED: u8 = 0x0A;
pub const UTF8_STRING: u8 = 0x0C;
pub const SEQUENCE: u8 = 0x10;
pub const SET: u8 = 0x11;
pub const PRINTABLE_STRING: u8 = 0x13;
pub const T61_STRING: u8 = 0x14;
pub const IA5_STRING: u8 = 0x16;
pub const UTC_TIME: u8 = 0x17;
pub const GENERALIZED_TIME: u8 = 0x18;
pub const VISIBLE_STRING: u8 = 0x1A;
pub const BMP_STRING: u8 = 0x1E;

/// Length octet meaning "indefinite length, look for an EOC".
pub const INDEFINITE_LENGTH: u8 = 0x80;
/// Two-byte EOC marker (tag 0x00, length 0x00).
pub const EOC: [u8; 2] = [0x00, 0x00];

/// `SEQUENCE` tag as it appears on the wire (constructed).
pub const SEQUENCE_TAG: u8 = CLASS_UNIVERSAL | CONSTRUCTED | SEQUENCE;
/// `SET` tag as it appears on the wire (constructed).
pub const SET_TAG: u8 = CLASS_UNIVERSAL | CONSTRUCTED | SET;

/// `true` if the tag octet's constructed bit is set.
pub fn is_constructed(tag: u8) -> bool {
    tag & CONSTRUCTED != 0
}

/// Strip class and constructed bits, leaving the bare tag number.
pub fn tag_number(tag: u8) -> u8 {
    tag & TAG_NUMBER_MASK
}
