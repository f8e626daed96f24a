use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

const DIGEST_PROOF_DOMAIN: &[u8] = b"zkaa/settlement/v1";

/// What a settlement proof attests: folding the pending batch identified by
/// `batch_digest` over `prior_commitment` yields `new_commitment`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPublicInput {
    /// Contract whose off-chain state is being settled.
    pub contract: Address,
    pub prior_commitment: H256,
    pub new_commitment: H256,
    pub batch_digest: H256,
    pub updates: u64,
}

impl SettlementPublicInput {
    pub fn digest(&self) -> H256 {
        keccak256(encode(&[
            Token::Address(self.contract),
            Token::FixedBytes(self.prior_commitment.as_bytes().to_vec()),
            Token::FixedBytes(self.new_commitment.as_bytes().to_vec()),
            Token::FixedBytes(self.batch_digest.as_bytes().to_vec()),
            Token::Uint(self.updates.into()),
        ]))
        .into()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementProof {
    pub public_input: SettlementPublicInput,
    pub proof: Bytes,
}

pub trait ProofVerifier: Send + Sync {
    fn verify(&self, proof: &[u8], public_input: &SettlementPublicInput) -> bool;
}

pub trait SettlementProver {
    fn prove(&self, public_input: SettlementPublicInput) -> SettlementProof;
}

/// Keyed-hash attestation: `keccak(domain || key || digest(public_input))`.
///
/// Anyone holding the key can settle, so it is only suitable where the
/// aggregator and the chain share a trust domain (local chains, tests).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DigestProver {
    key: H256,
}

impl DigestProver {
    pub fn new(key: H256) -> Self {
        Self { key }
    }

    fn attest(&self, public_input: &SettlementPublicInput) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(DIGEST_PROOF_DOMAIN.len() + 64);
        preimage.extend_from_slice(DIGEST_PROOF_DOMAIN);
        preimage.extend_from_slice(self.key.as_bytes());
        preimage.extend_from_slice(public_input.digest().as_bytes());
        keccak256(preimage)
    }
}

impl SettlementProver for DigestProver {
    fn prove(&self, public_input: SettlementPublicInput) -> SettlementProof {
        SettlementProof {
            public_input,
            proof: Bytes::from(self.attest(&public_input).to_vec()),
        }
    }
}

impl ProofVerifier for DigestProver {
    fn verify(&self, proof: &[u8], public_input: &SettlementPublicInput) -> bool {
        proof == self.attest(public_input).as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> SettlementPublicInput {
        SettlementPublicInput {
            contract: Address::repeat_byte(1),
            prior_commitment: H256::repeat_byte(2),
            new_commitment: H256::repeat_byte(3),
            batch_digest: H256::repeat_byte(4),
            updates: 2,
        }
    }

    #[test]
    fn digest_proof_verifies_its_own_input() {
        let prover = DigestProver::new(H256::repeat_byte(9));
        let proof = prover.prove(input());
        assert!(prover.verify(&proof.proof, &proof.public_input));
    }

    #[test]
    fn digest_proof_rejects_tampered_input() {
        let prover = DigestProver::default();
        let proof = prover.prove(input());
        let mut tampered = proof.public_input;
        tampered.new_commitment = H256::repeat_byte(0xff);
        assert!(!prover.verify(&proof.proof, &tampered));
    }

    #[test]
    fn digest_proof_rejects_other_key() {
        let proof = DigestProver::new(H256::repeat_byte(1)).prove(input());
        assert!(!DigestProver::new(H256::repeat_byte(2)).verify(&proof.proof, &proof.public_input));
    }
}
