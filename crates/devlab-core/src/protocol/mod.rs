//! Protocol module containing the ADB smart-socket codec.

pub mod codec;

pub use codec::{decode_block, decode_status, encode_request, parse_device_list, ProtocolError};
