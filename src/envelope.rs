//! Wire envelope for the execution layer.
//!
//! Every transaction kind the layer understands travels in one BCS tagged
//! union, so EVM calldata has to be wrapped in the `EvmContract` variant
//! before submission. Read calls come back as a JSON array of byte values
//! rather than a hex string; [`decode_call_result`] turns either shape into a
//! plain buffer for ABI decoding.

use crate::error::{
    GameError,
    Result,
};
use alloy_primitives::Bytes;
use serde::{
    Deserialize,
    Serialize,
};

/// Variant order is part of the wire format.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TransactionEnvelope {
    EoaBaseTokenTransfer,
    ScriptOrDeployment,
    EntryFunction,
    L2Contract,
    EvmContract(Vec<u8>),
}

impl TransactionEnvelope {
    pub fn evm_calldata(&self) -> Option<&[u8]> {
        match self {
            TransactionEnvelope::EvmContract(code) => Some(code),
            _ => None,
        }
    }
}

/// Call result data as returned by `eth_call` on the execution layer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCallData {
    ByteArray(Vec<u8>),
    Hex(String),
}

pub fn encode_calldata(calldata: &[u8]) -> Result<String> {
    let envelope = TransactionEnvelope::EvmContract(calldata.to_vec());
    let bytes = bcs::to_bytes(&envelope)
        .map_err(|e| GameError::format(format!("envelope serialization failed: {e}")))?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

pub fn encode_hex_calldata(calldata: &str) -> Result<String> {
    let bytes = parse_prefixed_hex(calldata)?;
    encode_calldata(&bytes)
}

pub fn decode_envelope(encoded: &str) -> Result<TransactionEnvelope> {
    let bytes = parse_prefixed_hex(encoded)?;
    bcs::from_bytes(&bytes)
        .map_err(|e| GameError::format(format!("malformed transaction envelope: {e}")))
}

/// Absent or empty data means "no result" and yields an empty buffer.
pub fn decode_call_result(raw: Option<&RawCallData>) -> Result<Bytes> {
    match raw {
        None => Ok(Bytes::new()),
        Some(RawCallData::ByteArray(values)) => Ok(Bytes::copy_from_slice(values)),
        Some(RawCallData::Hex(text)) => {
            let digits = text.strip_prefix("0x").unwrap_or(text);
            hex::decode(digits)
                .map(Bytes::from)
                .map_err(|e| GameError::decode(format!("call result hex {text:?}: {e}")))
        }
    }
}

fn parse_prefixed_hex(input: &str) -> Result<Vec<u8>> {
    let digits = input
        .strip_prefix("0x")
        .ok_or_else(|| GameError::format(format!("{input:?} is missing the 0x prefix")))?;
    if digits.len() % 2 != 0 {
        return Err(GameError::format(format!(
            "{input:?} has an odd number of hex digits"
        )));
    }
    hex::decode(digits).map_err(|e| GameError::format(format!("{input:?}: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_hex_calldata__wraps_bytes_in_evm_contract_variant() {
        // given
        let calldata = "0x12ab";

        // when
        let encoded = encode_hex_calldata(calldata).unwrap();

        // then
        // variant index 4, length 2, payload
        assert_eq!(encoded, "0x040212ab");
    }

    #[test]
    fn encode_calldata__uses_uleb128_length_for_long_payloads() {
        // given
        let calldata = vec![0xffu8; 200];

        // when
        let encoded = encode_calldata(&calldata).unwrap();

        // then
        assert!(encoded.starts_with("0x04c801"));
        assert_eq!(encoded.len(), 2 + 2 * (1 + 2 + 200));
    }

    #[test]
    fn encode_hex_calldata__rejects_missing_prefix() {
        let err = encode_hex_calldata("12ab").unwrap_err();
        assert!(matches!(err, GameError::Format(_)));
    }

    #[test]
    fn encode_hex_calldata__rejects_odd_length() {
        let err = encode_hex_calldata("0x12a").unwrap_err();
        assert!(matches!(err, GameError::Format(_)));
    }

    #[test]
    fn encode_hex_calldata__rejects_non_hex_digits() {
        let err = encode_hex_calldata("0xzz").unwrap_err();
        assert!(matches!(err, GameError::Format(_)));
    }

    #[test]
    fn decode_envelope__reads_unit_variants() {
        // given
        let encoded = "0x02";

        // when
        let envelope = decode_envelope(encoded).unwrap();

        // then
        assert_eq!(envelope, TransactionEnvelope::EntryFunction);
        assert_eq!(envelope.evm_calldata(), None);
    }

    #[test]
    fn decode_envelope__rejects_unknown_variant() {
        let err = decode_envelope("0x0500").unwrap_err();
        assert!(matches!(err, GameError::Format(_)));
    }

    #[test]
    fn decode_envelope__rejects_trailing_bytes() {
        let err = decode_envelope("0x040112ff").unwrap_err();
        assert!(matches!(err, GameError::Format(_)));
    }

    #[test]
    fn decode_call_result__empty_or_absent_is_empty_buffer() {
        assert!(decode_call_result(None).unwrap().is_empty());
        assert!(
            decode_call_result(Some(&RawCallData::ByteArray(Vec::new())))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn decode_call_result__normalizes_numeric_array_and_hex() {
        // given
        let numeric: RawCallData = serde_json::from_str("[0, 17, 255]").unwrap();
        let hex_shaped: RawCallData = serde_json::from_str("\"0x0011ff\"").unwrap();

        // when
        let from_numeric = decode_call_result(Some(&numeric)).unwrap();
        let from_hex = decode_call_result(Some(&hex_shaped)).unwrap();

        // then
        assert_eq!(from_numeric.as_ref(), &[0u8, 17, 255]);
        assert_eq!(from_numeric, from_hex);
    }

    #[test]
    fn raw_call_data__rejects_values_above_a_byte() {
        let parsed = serde_json::from_str::<RawCallData>("[1, 256]");
        assert!(parsed.is_err());
    }

    proptest! {
        #[test]
        fn decode_envelope__inverts_encode_calldata(
            calldata in proptest::collection::vec(any::<u8>(), 1..512)
        ) {
            let encoded = encode_calldata(&calldata).unwrap();
            let envelope = decode_envelope(&encoded).unwrap();
            prop_assert_eq!(envelope.evm_calldata(), Some(calldata.as_slice()));
        }
    }
}
