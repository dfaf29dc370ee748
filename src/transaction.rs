//! Transaction module split into types and wire codecs

pub mod codec;
pub mod types;

pub use codec::{f8_to_int, format_timestamp, int_to_f8, BinTuple};
pub use types::{PublicKey, Transaction};
