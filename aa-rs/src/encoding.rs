use crate::types::{UserOperation, Withdrawal};
use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "key": fmt_u256(op.key),
        "calldata": {
            "recipient": fmt_address(op.calldata.recipient),
            "amount": op.calldata.amount,
        },
        "fee": op.fee,
    })
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

/// ABI encoding of every operation field, in declaration order.
fn pack_for_hash(op: &UserOperation) -> Vec<u8> {
    encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::Uint(op.key),
        Token::Address(op.calldata.recipient),
        Token::Uint(op.calldata.amount.into()),
        Token::Uint(op.fee.into()),
    ])
}

/// `keccak(keccak(op) || entryPoint)`: the digest owners sign.
///
/// Binding the entry point address keeps a signed operation from being
/// replayed against another deployment.
pub fn user_op_hash(op: &UserOperation, entry_point: Address) -> H256 {
    keccak256(encode(&[
        Token::FixedBytes(keccak256(pack_for_hash(op)).to_vec()),
        Token::Address(entry_point),
    ]))
    .into()
}

pub fn withdrawal_hash(withdrawal: &Withdrawal) -> H256 {
    keccak256(encode(&[
        Token::Address(withdrawal.account),
        Token::Address(withdrawal.recipient),
        Token::Uint(withdrawal.amount.into()),
    ]))
    .into()
}

/// Serde helper rendering raw bytes as a `0x` prefixed hex string.
pub mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::fmt_bytes(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        let raw = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(raw).map_err(D::Error::custom)
    }
}
