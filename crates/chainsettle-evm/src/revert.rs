//! Best-effort revert reason decoding.
//!
//! Nodes report a reverted `eth_call` as a JSON-RPC error whose `data` holds
//! the contract's return data. Recognised payloads:
//!
//! - `Error(string)` (`0x08c379a0`) → the message
//! - `Panic(uint256)` (`0x4e487b71`) → `"panic 0x11: arithmetic overflow or underflow"`
//! - any other 4-byte selector → `"custom error 0x<selector>"`

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use serde_json::Value;

use crate::request::JsonRpcError;

pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Decode raw revert data into a readable reason.
///
/// Empty data (a bare `revert()`) carries no reason and yields `None`.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    if let Some(msg) = decode_error_string(data) {
        return Some(msg);
    }
    if let Some((code, meaning)) = decode_panic(data) {
        return Some(format!("panic 0x{code:02x}: {meaning}"));
    }
    Some(format!("custom error 0x{}", hex::encode(&data[..4])))
}

/// Decode an `Error(string)` payload.
pub fn decode_error_string(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    match DynSolType::String.abi_decode(&data[4..]) {
        Ok(DynSolValue::String(s)) => Some(s),
        _ => None,
    }
}

/// Decode a `Panic(uint256)` payload into `(code, meaning)`.
pub fn decode_panic(data: &[u8]) -> Option<(u64, &'static str)> {
    if data.len() < 4 || data[..4] != PANIC_SELECTOR {
        return None;
    }
    match DynSolType::Uint(256).abi_decode(&data[4..]) {
        Ok(DynSolValue::Uint(v, _)) => {
            let code = u64::try_from(v).ok()?;
            Some((code, panic_meaning(code)))
        }
        _ => None,
    }
}

/// Map a Solidity panic code to a human-readable description.
pub fn panic_meaning(code: u64) -> &'static str {
    match code {
        0x00 => "generic compiler-inserted panic",
        0x01 => "assert() called with false condition",
        0x11 => "arithmetic overflow or underflow",
        0x12 => "division or modulo by zero",
        0x21 => "invalid enum value",
        0x22 => "corrupted storage byte array",
        0x31 => ".pop() on empty array",
        0x32 => "out-of-bounds array access",
        0x41 => "too much memory allocated (out of memory)",
        0x51 => "called zero-initialized internal function pointer",
        _ => "unknown panic code",
    }
}

/// Extract a revert reason from a node's error object.
///
/// `data` is either a hex string or an object with a nested `data` field
/// depending on the client. Falls back to the text after
/// `"execution reverted: "` in the message.
pub fn reason_from_rpc_error(err: &JsonRpcError) -> Option<String> {
    let hex_data = match &err.data {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Object(obj)) => obj.get("data").and_then(Value::as_str),
        _ => None,
    };
    if let Some(data) = hex_data.and_then(|s| hex::decode(s.trim_start_matches("0x")).ok()) {
        if let Some(reason) = decode_revert_data(&data) {
            return Some(reason);
        }
    }
    err.message
        .strip_prefix("execution reverted: ")
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `require(false, "Not enough tokens to transfer")`
    const REVERT_HEX: &str = "08c379a00000000000000000000000000000000000000000000000000000000000000020000000000000000000000000000000000000000000000000000000000000001e4e6f7420656e6f75676820746f6b656e7320746f207472616e73666572000000";

    const PANIC_OVERFLOW_HEX: &str =
        "4e487b710000000000000000000000000000000000000000000000000000000000000011";

    fn rpc_error(message: &str, data: Option<Value>) -> JsonRpcError {
        JsonRpcError {
            code: 3,
            message: message.into(),
            data,
        }
    }

    #[test]
    fn error_string() {
        let data = hex::decode(REVERT_HEX).unwrap();
        assert_eq!(
            decode_revert_data(&data).as_deref(),
            Some("Not enough tokens to transfer")
        );
    }

    #[test]
    fn panic_code() {
        let data = hex::decode(PANIC_OVERFLOW_HEX).unwrap();
        assert_eq!(
            decode_revert_data(&data).as_deref(),
            Some("panic 0x11: arithmetic overflow or underflow")
        );
    }

    #[test]
    fn custom_error_reports_selector() {
        // IdentityNotVerified(address) style custom error
        let data = hex::decode("deadbeef0000000000000000000000000000000000000000000000000000000000000001").unwrap();
        assert_eq!(decode_revert_data(&data).as_deref(), Some("custom error 0xdeadbeef"));
    }

    #[test]
    fn bare_revert_has_no_reason() {
        assert!(decode_revert_data(&[]).is_none());
        assert!(decode_revert_data(&[0x08, 0xc3]).is_none());
    }

    #[test]
    fn reason_from_string_data() {
        let err = rpc_error("execution reverted", Some(Value::String(format!("0x{REVERT_HEX}"))));
        assert_eq!(
            reason_from_rpc_error(&err).as_deref(),
            Some("Not enough tokens to transfer")
        );
    }

    #[test]
    fn reason_from_nested_data() {
        let err = rpc_error(
            "execution reverted",
            Some(serde_json::json!({ "data": format!("0x{PANIC_OVERFLOW_HEX}") })),
        );
        assert_eq!(
            reason_from_rpc_error(&err).as_deref(),
            Some("panic 0x11: arithmetic overflow or underflow")
        );
    }

    #[test]
    fn reason_from_message_fallback() {
        let err = rpc_error("execution reverted: Transfer not possible", None);
        assert_eq!(
            reason_from_rpc_error(&err).as_deref(),
            Some("Transfer not possible")
        );
        assert!(reason_from_rpc_error(&rpc_error("execution reverted", None)).is_none());
    }
}
