//! BER/DER primitive I/O and string coercion (spec §4.1, §4.2).
//!
//! `stream` implements the sticky-error byte cursor ("PrimitiveIO" in the
//! original design); `string_coder` builds the ASN.1 string-type
//! narrowing/widening rules on top of it; `tag` holds the raw constants
//! both depend on.

pub mod stream;
pub mod string_coder;
pub mod tag;

pub use stream::{ByteStream, ByteWriter, RawObject};
pub use string_coder::{AsnString, StringKind};
