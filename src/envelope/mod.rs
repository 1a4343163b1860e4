//! CMS/PKCS#7 enveloping: producer and consumer (spec §4.4).

pub mod consumer;
pub mod producer;

pub use consumer::{DeenvelopeConsumer, DeenvelopeState};
pub use producer::{ContentListItem, Envelope, EnvelopeUsage};
