//! Certificate data model: Distinguished Names and the mutable-until-signed
//! certificate record (spec §4.5).

pub mod dn;
pub mod object;

pub use dn::DistinguishedName;
pub use object::{CertFlags, CertKind, CertObject, ComponentSelector, Extension, Validity};
