use std::{fmt, str::FromStr};

use ethers::types::H256;
use ethers::utils::keccak256;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::encoding::{fmt_bytes, hex_bytes};
use crate::error::{AaError, AaResult};

/// Tag hashed into the scalar of the pre-initialization owner.
pub(crate) const DEAD_OWNER_TAG: &[u8] = b"zkaa/dead-owner";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    #[default]
    Secp256k1,
    Secp256r1,
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Secp256k1 => f.write_str("secp256k1"),
            Curve::Secp256r1 => f.write_str("secp256r1"),
        }
    }
}

impl FromStr for Curve {
    type Err = AaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "k1" => Ok(Curve::Secp256k1),
            "secp256r1" | "p256" | "r1" => Ok(Curve::Secp256r1),
            other => Err(AaError::InvalidKey(format!("unknown curve {other}"))),
        }
    }
}

/// Uncompressed SEC1 encoding of an owner's public key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerKey(#[serde(with = "hex_bytes")] Vec<u8>);

impl OwnerKey {
    /// Parses any SEC1 encoding valid on `curve` and normalizes it to the
    /// uncompressed form, so equal points always compare equal.
    pub fn from_sec1(curve: Curve, bytes: &[u8]) -> AaResult<Self> {
        let encoded = match curve {
            Curve::Secp256k1 => k256::PublicKey::from_sec1_bytes(bytes)
                .map_err(|e| AaError::InvalidKey(e.to_string()))?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            Curve::Secp256r1 => p256::PublicKey::from_sec1_bytes(bytes)
                .map_err(|e| AaError::InvalidKey(e.to_string()))?
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        };
        Ok(Self(encoded))
    }

    /// The pre-initialization marker stored by freshly deployed accounts.
    ///
    /// It is `G * s` for `s = keccak256(DEAD_OWNER_TAG)` with the top byte
    /// cleared, which keeps `0 < s < n` on both curves. Since `s` is public, no
    /// honest owner holds this key.
    pub fn dead(curve: Curve) -> AaResult<Self> {
        let mut scalar = keccak256(DEAD_OWNER_TAG);
        scalar[0] = 0;
        let encoded = match curve {
            Curve::Secp256k1 => k256::SecretKey::from_slice(&scalar)
                .map_err(|e| AaError::InvalidKey(e.to_string()))?
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            Curve::Secp256r1 => p256::SecretKey::from_slice(&scalar)
                .map_err(|e| AaError::InvalidKey(e.to_string()))?
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        };
        Ok(Self(encoded))
    }

    pub fn is_dead(&self, curve: Curve) -> bool {
        OwnerKey::dead(curve).map(|dead| &dead == self).unwrap_or(false)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerKey({})", fmt_bytes(&self.0))
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fmt_bytes(&self.0))
    }
}

/// Fixed-width `r || s` ECDSA signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature(#[serde(with = "hex_bytes")] Vec<u8>);

impl EcdsaSignature {
    pub fn from_bytes(bytes: &[u8]) -> AaResult<Self> {
        if bytes.len() != 64 {
            return Err(AaError::InvalidKey(format!(
                "expected 64-byte signature, got {} bytes",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EcdsaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EcdsaSignature({})", fmt_bytes(&self.0))
    }
}

/// Checks an owner's signature over a 32-byte message digest.
pub trait SignatureVerifier: Send + Sync {
    fn curve(&self) -> Curve;

    fn verify(&self, signature: &EcdsaSignature, message_hash: H256, public_key: &OwnerKey) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EcdsaVerifier {
    curve: Curve,
}

impl EcdsaVerifier {
    pub fn new(curve: Curve) -> Self {
        Self { curve }
    }
}

impl SignatureVerifier for EcdsaVerifier {
    fn curve(&self) -> Curve {
        self.curve
    }

    fn verify(&self, signature: &EcdsaSignature, message_hash: H256, public_key: &OwnerKey) -> bool {
        match self.curve {
            Curve::Secp256k1 => {
                use k256::ecdsa::signature::hazmat::PrehashVerifier;
                let Ok(key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key.as_bytes())
                else {
                    return false;
                };
                let Ok(sig) = k256::ecdsa::Signature::from_slice(signature.as_bytes()) else {
                    return false;
                };
                key.verify_prehash(message_hash.as_bytes(), &sig).is_ok()
            }
            Curve::Secp256r1 => {
                use p256::ecdsa::signature::hazmat::PrehashVerifier;
                let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key.as_bytes())
                else {
                    return false;
                };
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature.as_bytes()) else {
                    return false;
                };
                key.verify_prehash(message_hash.as_bytes(), &sig).is_ok()
            }
        }
    }
}

/// An owner's private key, used by the CLI and tests to sign operations.
#[derive(Clone)]
pub enum OwnerSigner {
    Secp256k1(k256::ecdsa::SigningKey),
    Secp256r1(p256::ecdsa::SigningKey),
}

impl OwnerSigner {
    pub fn random(curve: Curve) -> Self {
        match curve {
            Curve::Secp256k1 => OwnerSigner::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng)),
            Curve::Secp256r1 => OwnerSigner::Secp256r1(p256::ecdsa::SigningKey::random(&mut OsRng)),
        }
    }

    pub fn from_bytes(curve: Curve, bytes: &[u8]) -> AaResult<Self> {
        if bytes.len() != 32 {
            return Err(AaError::InvalidKey(format!(
                "expected 32-byte private key, got {} bytes",
                bytes.len()
            )));
        }
        let signer = match curve {
            Curve::Secp256k1 => OwnerSigner::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(bytes)
                    .map_err(|e| AaError::InvalidKey(e.to_string()))?,
            ),
            Curve::Secp256r1 => OwnerSigner::Secp256r1(
                p256::ecdsa::SigningKey::from_slice(bytes)
                    .map_err(|e| AaError::InvalidKey(e.to_string()))?,
            ),
        };
        Ok(signer)
    }

    /// Accepts the hex string with or without a `0x` prefix.
    pub fn from_hex(curve: Curve, s: &str) -> AaResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AaError::InvalidKey(e.to_string()))?;
        Self::from_bytes(curve, &bytes)
    }

    /// Hex private key. Only ever written to local secret files.
    pub fn to_hex(&self) -> String {
        match self {
            OwnerSigner::Secp256k1(key) => fmt_bytes(&key.to_bytes()),
            OwnerSigner::Secp256r1(key) => fmt_bytes(&key.to_bytes()),
        }
    }

    pub fn curve(&self) -> Curve {
        match self {
            OwnerSigner::Secp256k1(_) => Curve::Secp256k1,
            OwnerSigner::Secp256r1(_) => Curve::Secp256r1,
        }
    }

    pub fn owner_key(&self) -> OwnerKey {
        let encoded = match self {
            OwnerSigner::Secp256k1(key) => {
                key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
            }
            OwnerSigner::Secp256r1(key) => {
                key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
            }
        };
        OwnerKey(encoded)
    }

    pub fn sign_hash(&self, hash: H256) -> AaResult<EcdsaSignature> {
        let bytes = match self {
            OwnerSigner::Secp256k1(key) => {
                use k256::ecdsa::signature::hazmat::PrehashSigner;
                let sig: k256::ecdsa::Signature = key
                    .sign_prehash(hash.as_bytes())
                    .map_err(|e| AaError::InvalidKey(e.to_string()))?;
                sig.to_bytes().to_vec()
            }
            OwnerSigner::Secp256r1(key) => {
                use p256::ecdsa::signature::hazmat::PrehashSigner;
                let sig: p256::ecdsa::Signature = key
                    .sign_prehash(hash.as_bytes())
                    .map_err(|e| AaError::InvalidKey(e.to_string()))?;
                sig.to_bytes().to_vec()
            }
        };
        EcdsaSignature::from_bytes(&bytes)
    }
}

impl fmt::Debug for OwnerSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerSigner")
            .field("curve", &self.curve())
            .field("owner", &self.owner_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both_curves() -> [Curve; 2] {
        [Curve::Secp256k1, Curve::Secp256r1]
    }

    #[test]
    fn signature_round_trip_verifies() {
        for curve in both_curves() {
            let signer = OwnerSigner::random(curve);
            let hash = H256::repeat_byte(0x42);
            let sig = signer.sign_hash(hash).unwrap();
            assert!(EcdsaVerifier::new(curve).verify(&sig, hash, &signer.owner_key()));
        }
    }

    #[test]
    fn signature_over_other_hash_is_rejected() {
        for curve in both_curves() {
            let signer = OwnerSigner::random(curve);
            let sig = signer.sign_hash(H256::repeat_byte(1)).unwrap();
            assert!(!EcdsaVerifier::new(curve).verify(&sig, H256::repeat_byte(2), &signer.owner_key()));
        }
    }

    #[test]
    fn signature_from_other_owner_is_rejected() {
        let signer = OwnerSigner::random(Curve::Secp256k1);
        let other = OwnerSigner::random(Curve::Secp256k1);
        let hash = H256::repeat_byte(9);
        let sig = other.sign_hash(hash).unwrap();
        assert!(!EcdsaVerifier::new(Curve::Secp256k1).verify(&sig, hash, &signer.owner_key()));
    }

    #[test]
    fn verifier_on_wrong_curve_rejects() {
        let signer = OwnerSigner::random(Curve::Secp256r1);
        let hash = H256::repeat_byte(3);
        let sig = signer.sign_hash(hash).unwrap();
        assert!(!EcdsaVerifier::new(Curve::Secp256k1).verify(&sig, hash, &signer.owner_key()));
    }

    // The dead owner is a magic value: it must never collide with a real key.
    #[test]
    fn dead_owner_is_a_valid_point_distinct_from_fresh_keys() {
        for curve in both_curves() {
            let dead = OwnerKey::dead(curve).unwrap();
            assert_eq!(dead.as_bytes().len(), 65);
            assert_eq!(OwnerKey::from_sec1(curve, dead.as_bytes()).unwrap(), dead);
            assert!(dead.is_dead(curve));
            for _ in 0..8 {
                assert!(!OwnerSigner::random(curve).owner_key().is_dead(curve));
            }
        }
        assert_ne!(
            OwnerKey::dead(Curve::Secp256k1).unwrap(),
            OwnerKey::dead(Curve::Secp256r1).unwrap()
        );
    }

    #[test]
    fn signer_hex_round_trip() {
        let signer = OwnerSigner::random(Curve::Secp256r1);
        let restored = OwnerSigner::from_hex(Curve::Secp256r1, &signer.to_hex()).unwrap();
        assert_eq!(restored.owner_key(), signer.owner_key());
    }

    #[test]
    fn compressed_keys_are_normalized() {
        let signer = OwnerSigner::random(Curve::Secp256k1);
        let OwnerSigner::Secp256k1(key) = &signer else {
            unreachable!()
        };
        let compressed = key.verifying_key().to_encoded_point(true);
        let parsed = OwnerKey::from_sec1(Curve::Secp256k1, compressed.as_bytes()).unwrap();
        assert_eq!(parsed, signer.owner_key());
    }

    #[test]
    fn malformed_material_is_rejected() {
        assert!(OwnerKey::from_sec1(Curve::Secp256k1, &[4u8; 10]).is_err());
        assert!(EcdsaSignature::from_bytes(&[0u8; 63]).is_err());
        assert!(OwnerSigner::from_hex(Curve::Secp256k1, "0x1234").is_err());
        assert_eq!("p256".parse::<Curve>().unwrap(), Curve::Secp256r1);
        assert!("ed25519".parse::<Curve>().is_err());
    }
}
