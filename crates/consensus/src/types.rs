//! Core types for block construction, sealing and validation

use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, U256};
use alloy_rlp::{BufMut, Encodable};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConsensusError;
use crate::seal;

/// Block header
///
/// `extra_data` carries the sidecar map (see [`crate::extra`]). It must always
/// decode, an empty blob being the empty map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: B256,
    pub sha3_uncles: B256,
    /// Block producer, also the only declared validator of the block
    pub miner: Address,
    pub state_root: B256,
    pub tx_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Unix seconds
    pub timestamp: u64,
    /// Encoded sidecar map
    pub extra_data: Bytes,
    /// Cached hash, set by [`Header::compute_hash`]
    pub hash: B256,
}

impl Header {
    /// Keccak256 of the RLP encoded header fields, `hash` excluded
    pub fn calculate_hash(&self) -> B256 {
        keccak256(self.rlp_bytes())
    }

    /// Compute and cache the header hash
    pub fn compute_hash(&mut self) -> B256 {
        self.hash = self.calculate_hash();
        self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    fn rlp_bytes(&self) -> Vec<u8> {
        encode_list(&[
            &self.parent_hash,
            &self.sha3_uncles,
            &self.miner,
            &self.state_root,
            &self.tx_root,
            &self.receipts_root,
            &self.logs_bloom,
            &self.difficulty,
            &self.number,
            &self.gas_limit,
            &self.gas_used,
            &self.timestamp,
            &self.extra_data,
        ])
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn BufMut) {
        out.put_slice(&self.rlp_bytes());
    }

    fn length(&self) -> usize {
        self.rlp_bytes().len()
    }
}

/// A signed (or not yet signed) transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas: u64,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    /// 65 byte recoverable signature (r || s || v), empty when unsigned
    pub signature: Bytes,
    /// Sender, set when signing
    pub from: Address,
}

impl Transaction {
    /// Hash the sender signs over
    pub fn signing_hash(&self) -> B256 {
        let to = self.to_bytes();
        keccak256(encode_list(&[
            &self.nonce,
            &self.gas_price,
            &self.gas,
            &to,
            &self.value,
            &self.input,
        ]))
    }

    /// Transaction hash, covers the signature
    pub fn hash(&self) -> B256 {
        keccak256(self.rlp_bytes())
    }

    /// Sign with `key`, setting `from` to the key's address
    pub fn sign(mut self, key: &SigningKey) -> Result<Self, ConsensusError> {
        let signature = seal::sign_prehash(key, self.signing_hash())?;
        self.signature = Bytes::copy_from_slice(&signature);
        self.from = seal::address_from_key(key);
        Ok(self)
    }

    /// Recover the sender from the signature
    pub fn recover_sender(&self) -> Result<Address, ConsensusError> {
        seal::recover_address(self.signing_hash(), &self.signature)
    }

    fn to_bytes(&self) -> Bytes {
        self.to
            .map(|to| Bytes::copy_from_slice(to.as_slice()))
            .unwrap_or_default()
    }

    fn rlp_bytes(&self) -> Vec<u8> {
        let to = self.to_bytes();
        encode_list(&[
            &self.nonce,
            &self.gas_price,
            &self.gas,
            &to,
            &self.value,
            &self.input,
            &self.signature,
        ])
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut dyn BufMut) {
        out.put_slice(&self.rlp_bytes());
    }

    fn length(&self) -> usize {
        self.rlp_bytes().len()
    }
}

/// Outcome of a transaction written into a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
}

impl Encodable for Receipt {
    fn encode(&self, out: &mut dyn BufMut) {
        let status = u8::from(self.success);
        out.put_slice(&encode_list(&[&status, &self.cumulative_gas_used, &self.tx_hash]));
    }

    fn length(&self) -> usize {
        let status = u8::from(self.success);
        encode_list(&[&status, &self.cumulative_gas_used, &self.tx_hash]).len()
    }
}

/// A block: header, body and (always empty) uncles
///
/// Created once by the block builder and not mutated after its hash is computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

impl Block {
    pub fn hash(&self) -> B256 {
        self.header.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }
}

/// Root over the transaction list
pub fn calculate_tx_root(transactions: &[Transaction]) -> B256 {
    list_hash(transactions)
}

/// Root over the uncle headers
pub fn calculate_uncle_root(uncles: &[Header]) -> B256 {
    list_hash(uncles)
}

/// Root over the receipts of a block
pub fn calculate_receipts_root(receipts: &[Receipt]) -> B256 {
    list_hash(receipts)
}

fn list_hash<T: Encodable>(items: &[T]) -> B256 {
    let payload_length = items.iter().map(Encodable::length).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    alloy_rlp::Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        item.encode(&mut out);
    }
    keccak256(out)
}

/// RLP list of already-typed fields
pub(crate) fn encode_list(fields: &[&dyn Encodable]) -> Vec<u8> {
    let payload_length = fields.iter().map(|field| field.length()).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    alloy_rlp::Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    out
}

/// Participant role registered in the staking contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Produces blocks
    Sequencer,
    /// Checks and applies blocks
    Validator,
    /// Checks blocks and challenges malicious ones
    WatchTower,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::Sequencer => "sequencer",
            NodeType::Validator => "validator",
            NodeType::WatchTower => "watchtower",
        };
        f.write_str(name)
    }
}

impl FromStr for NodeType {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequencer" => Ok(NodeType::Sequencer),
            "validator" => Ok(NodeType::Validator),
            "watchtower" => Ok(NodeType::WatchTower),
            other => Err(ConsensusError::UnknownNodeType(other.to_string())),
        }
    }
}
