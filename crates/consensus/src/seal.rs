//! Header sealing and signer recovery
//!
//! The seal signs Keccak256 of the canonical preimage: the header hash computed
//! with `EXTRA_VALIDATORS` stripped of its seal and committed seal. The
//! validator list and every other sidecar key stay in the preimage.

use alloy_primitives::{keccak256, Address, Bytes, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{ConsensusError, Result};
use crate::extra::{assign_extra_validators, get_validator_extra, put_validator_extra};
use crate::types::Header;

/// Length of a recoverable signature (r || s || v)
pub const SIGNATURE_LENGTH: usize = 65;

/// Hash of the header without signature material
pub fn canonical_preimage(header: &Header) -> Result<B256> {
    let mut stripped = header.clone();
    let validators = get_validator_extra(&stripped)?.validators;
    assign_extra_validators(&mut stripped, &validators)?;
    Ok(stripped.calculate_hash())
}

/// The digest the block producer signs
pub fn seal_hash(header: &Header) -> Result<B256> {
    Ok(keccak256(canonical_preimage(header)?))
}

/// Sign `header` with `key`, returning a copy carrying the seal
///
/// The header must already hold a decodable `EXTRA_VALIDATORS` entry.
pub fn write_seal(key: &SigningKey, header: &Header) -> Result<Header> {
    let mut sealed = header.clone();
    let mut validator_extra = get_validator_extra(&sealed)?;

    let signature = sign_prehash(key, seal_hash(&sealed)?)?;
    validator_extra.seal = Bytes::copy_from_slice(&signature);
    put_validator_extra(&mut sealed, &validator_extra)?;

    Ok(sealed)
}

/// Address that produced the header seal
///
/// Not compared against `header.miner`; that is the verifier's job.
pub fn address_recover_from_header(header: &Header) -> Result<Address> {
    let validator_extra = get_validator_extra(header)?;
    recover_address(seal_hash(header)?, &validator_extra.seal)
}

/// Recoverable ECDSA signature over a 32 byte digest
pub fn sign_prehash(key: &SigningKey, hash: B256) -> Result<[u8; SIGNATURE_LENGTH]> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|e| ConsensusError::Signing(e.to_string()))?;

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte();
    Ok(out)
}

/// Recover the signer address of `signature` over `hash`
pub fn recover_address(hash: B256, signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(ConsensusError::InvalidSeal(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let parsed = Signature::from_slice(&signature[..64])
        .map_err(|e| ConsensusError::InvalidSeal(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(signature[64])
        .ok_or_else(|| ConsensusError::InvalidSeal(format!("bad recovery id {}", signature[64])))?;

    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &parsed, recovery_id)
        .map_err(|e| ConsensusError::InvalidSeal(e.to_string()))?;
    Ok(address_from_verifying_key(&key))
}

pub fn address_from_key(key: &SigningKey) -> Address {
    address_from_verifying_key(key.verifying_key())
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_raw_public_key(&point.as_bytes()[1..])
}
