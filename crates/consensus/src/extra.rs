//! Header sidecar encoding
//!
//! `Header::extra_data` holds a `string -> bytes` map encoded as a flat RLP list
//! `[key0, value0, key1, value1, ...]` with keys in ascending order. The
//! encoding is deterministic because it is part of the signed header preimage.

use alloy_primitives::{Address, Bytes};
use alloy_rlp::{Decodable, Encodable};
use std::collections::BTreeMap;

use crate::error::{ConsensusError, Result};
use crate::types::{encode_list, Header};

/// Validators and seal of the block
pub const EXTRA_VALIDATORS: &str = "EXTRA_VALIDATORS";

/// Hash of the block a fraud proof disputes
pub const FRAUD_PROOF_OF: &str = "FRAUD_PROOF_OF";

/// Hash of the transaction opening a dispute resolution
pub const BEGIN_DISPUTE_RESOLUTION_OF: &str = "BEGIN_DISPUTE_RESOLUTION_OF";

/// Hash of the transaction closing a dispute resolution
pub const END_DISPUTE_RESOLUTION_OF: &str = "END_DISPUTE_RESOLUTION_OF";

/// Decoded sidecar; `BTreeMap` keeps keys sorted for encoding
pub type ExtraMap = BTreeMap<String, Bytes>;

/// Encode a sidecar map
pub fn encode_extra(map: &ExtraMap) -> Bytes {
    let mut fields: Vec<Bytes> = Vec::with_capacity(map.len() * 2);
    for (key, value) in map {
        fields.push(Bytes::copy_from_slice(key.as_bytes()));
        fields.push(value.clone());
    }

    let mut out = Vec::new();
    fields.encode(&mut out);
    out.into()
}

/// Decode a sidecar map; empty input is the empty map
pub fn decode_extra(data: &[u8]) -> Result<ExtraMap> {
    let mut map = ExtraMap::new();
    if data.is_empty() {
        return Ok(map);
    }

    let items = split_items(list_payload(data)?)?;
    if items.len() % 2 != 0 {
        return Err(ConsensusError::OddExtraElements(items.len()));
    }

    for pair in items.chunks(2) {
        let key = decode_bytes(pair[0])?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|_| ConsensusError::InvalidExtra("sidecar key is not utf-8".to_string()))?;
        let value = decode_bytes(pair[1])?;
        map.insert(key, value);
    }

    Ok(map)
}

/// Sidecar entry declaring the block validators and carrying the seal
///
/// `committed_seal` is reserved for multi-signer finality and is never populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorExtra {
    pub validators: Vec<Address>,
    pub seal: Bytes,
    pub committed_seal: Vec<Bytes>,
}

impl ValidatorExtra {
    pub fn new(validators: Vec<Address>) -> Self {
        Self {
            validators,
            ..Default::default()
        }
    }

    /// `[[validators...], seal, [committed seals...]]`; empty seal and committed
    /// seal encode as the RLP empty string and empty list respectively
    pub fn encode(&self) -> Bytes {
        encode_list(&[&self.validators, &self.seal, &self.committed_seal]).into()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let items = split_items(list_payload(data)?)?;
        if items.len() != 3 {
            return Err(ConsensusError::InvalidValidatorExtra(items.len()));
        }

        let mut raw = items[0];
        let validators = Vec::<Address>::decode(&mut raw).map_err(rlp_error)?;

        let seal = if is_null(items[1]) {
            Bytes::new()
        } else {
            decode_bytes(items[1])?
        };

        let committed_seal = if is_null(items[2]) {
            Vec::new()
        } else {
            let mut raw = items[2];
            Vec::<Bytes>::decode(&mut raw).map_err(rlp_error)?
        };

        Ok(Self {
            validators,
            seal,
            committed_seal,
        })
    }
}

/// Decode the header sidecar
pub fn get_extra(header: &Header) -> Result<ExtraMap> {
    decode_extra(&header.extra_data)
}

/// Decode the `EXTRA_VALIDATORS` entry of the header sidecar
pub fn get_validator_extra(header: &Header) -> Result<ValidatorExtra> {
    let extra = get_extra(header)?;
    let raw = extra
        .get(EXTRA_VALIDATORS)
        .ok_or(ConsensusError::MissingValidatorExtra)?;
    ValidatorExtra::decode(raw)
}

/// Replace `EXTRA_VALIDATORS` with a fresh entry declaring `validators`
///
/// Any previous seal and committed seal are discarded; other keys are kept.
pub fn assign_extra_validators(header: &mut Header, validators: &[Address]) -> Result<()> {
    put_validator_extra(header, &ValidatorExtra::new(validators.to_vec()))
}

/// Store `validator_extra` verbatim, seal included
pub fn put_validator_extra(header: &mut Header, validator_extra: &ValidatorExtra) -> Result<()> {
    set_extra_value(header, EXTRA_VALIDATORS, validator_extra.encode())
}

/// Set a single sidecar key, keeping the others
pub fn set_extra_value(header: &mut Header, key: &str, value: Bytes) -> Result<()> {
    let mut extra = get_extra(header)?;
    extra.insert(key.to_string(), value);
    header.extra_data = encode_extra(&extra);
    Ok(())
}

fn list_payload(data: &[u8]) -> Result<&[u8]> {
    let mut buf = data;
    let header = alloy_rlp::Header::decode(&mut buf).map_err(rlp_error)?;
    if !header.list {
        return Err(ConsensusError::InvalidExtra("expected an RLP list".to_string()));
    }
    if buf.len() != header.payload_length {
        return Err(ConsensusError::InvalidExtra(format!(
            "list payload is {} bytes, {} available",
            header.payload_length,
            buf.len()
        )));
    }
    Ok(buf)
}

/// Split an RLP list payload into the raw encodings of its items
fn split_items(mut payload: &[u8]) -> Result<Vec<&[u8]>> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let mut rest = payload;
        let header = alloy_rlp::Header::decode(&mut rest).map_err(rlp_error)?;
        let total = payload.len() - rest.len() + header.payload_length;
        if total > payload.len() {
            return Err(ConsensusError::InvalidExtra("truncated list item".to_string()));
        }
        items.push(&payload[..total]);
        payload = &payload[total..];
    }
    Ok(items)
}

fn decode_bytes(mut raw: &[u8]) -> Result<Bytes> {
    Bytes::decode(&mut raw).map_err(rlp_error)
}

/// RLP empty string or empty list
fn is_null(raw: &[u8]) -> bool {
    raw == [alloy_rlp::EMPTY_STRING_CODE] || raw == [alloy_rlp::EMPTY_LIST_CODE]
}

fn rlp_error(err: alloy_rlp::Error) -> ConsensusError {
    ConsensusError::InvalidExtra(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> ExtraMap {
        let mut map = ExtraMap::new();
        map.insert(FRAUD_PROOF_OF.to_string(), Bytes::from_static(&[0xaa; 32]));
        map.insert(BEGIN_DISPUTE_RESOLUTION_OF.to_string(), Bytes::from_static(&[0xbb; 32]));
        map.insert("EMPTY".to_string(), Bytes::new());
        map
    }

    #[test]
    fn test_decode_empty_is_empty_map() {
        assert!(decode_extra(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let map = sample_map();
        assert_eq!(decode_extra(&encode_extra(&map)).unwrap(), map);
    }

    #[test]
    fn test_encoding_is_sorted_by_key() {
        let encoded = encode_extra(&sample_map());
        let items = split_items(list_payload(&encoded).unwrap()).unwrap();
        let keys: Vec<Bytes> = items
            .iter()
            .step_by(2)
            .map(|raw| decode_bytes(raw).unwrap())
            .collect();

        assert_eq!(
            keys,
            vec![
                Bytes::from_static(BEGIN_DISPUTE_RESOLUTION_OF.as_bytes()),
                Bytes::from_static(b"EMPTY"),
                Bytes::from_static(FRAUD_PROOF_OF.as_bytes()),
            ]
        );
    }

    #[test]
    fn test_odd_element_count_rejected() {
        let mut out = Vec::new();
        vec![Bytes::from_static(b"KEY")].encode(&mut out);

        assert!(matches!(
            decode_extra(&out),
            Err(ConsensusError::OddExtraElements(1))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = encode_extra(&sample_map()).to_vec();
        encoded.push(0x01);
        assert!(decode_extra(&encoded).is_err());
    }

    #[test]
    fn test_validator_extra_roundtrip_and_null_forms() {
        let extra = ValidatorExtra {
            validators: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            seal: Bytes::from_static(&[9u8; 65]),
            committed_seal: Vec::new(),
        };
        assert_eq!(ValidatorExtra::decode(&extra.encode()).unwrap(), extra);

        // empty seal is the empty string, empty committed seal the empty list
        let bare = ValidatorExtra::new(vec![Address::repeat_byte(3)]).encode();
        assert_eq!(&bare[bare.len() - 2..], &[0x80, 0xc0]);
    }

    #[test]
    fn test_validator_extra_requires_three_elements() {
        let raw = encode_list(&[&vec![Address::repeat_byte(1)], &Bytes::new()]);
        assert!(matches!(
            ValidatorExtra::decode(&raw),
            Err(ConsensusError::InvalidValidatorExtra(2))
        ));
    }

    #[test]
    fn test_assign_resets_seal_and_keeps_other_keys() {
        let mut header = Header::default();
        set_extra_value(&mut header, FRAUD_PROOF_OF, Bytes::from_static(&[1u8; 32])).unwrap();
        put_validator_extra(
            &mut header,
            &ValidatorExtra {
                validators: vec![Address::repeat_byte(1)],
                seal: Bytes::from_static(&[7u8; 65]),
                committed_seal: vec![Bytes::from_static(&[8u8; 65])],
            },
        )
        .unwrap();

        assign_extra_validators(&mut header, &[Address::repeat_byte(2)]).unwrap();

        let validator_extra = get_validator_extra(&header).unwrap();
        assert_eq!(validator_extra, ValidatorExtra::new(vec![Address::repeat_byte(2)]));
        assert!(get_extra(&header).unwrap().contains_key(FRAUD_PROOF_OF));
    }

    #[test]
    fn test_missing_validator_extra() {
        assert!(matches!(
            get_validator_extra(&Header::default()),
            Err(ConsensusError::MissingValidatorExtra)
        ));
    }
}
