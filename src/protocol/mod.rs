//! Protocol engines: the SCEP-style issuance transaction (spec §4.7) and
//! CMP-over-TCP message framing (spec §6).

pub mod cmp;
pub mod scep;

pub use cmp::{read_frame, write_frame, FramedMessage, MessageType as CmpMessageType};
pub use scep::{ClientTransaction, FailInfo, KeyPermission, ScepTransaction, TransactionState};
