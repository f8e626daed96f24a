use std::collections::BTreeMap;

use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::crypto::OwnerKey;
use crate::error::{AaError, AaResult};
use crate::proof::{ProofVerifier, SettlementProof, SettlementPublicInput};
use crate::types::NonceKey;

/// Canonical byte encoding of keys and values, used for commitments only.
pub trait StateEncode {
    fn state_encode(&self) -> Vec<u8>;
}

impl StateEncode for u64 {
    fn state_encode(&self) -> Vec<u8> {
        encode(&[Token::Uint((*self).into())])
    }
}

impl StateEncode for U256 {
    fn state_encode(&self) -> Vec<u8> {
        encode(&[Token::Uint(*self)])
    }
}

impl StateEncode for Address {
    fn state_encode(&self) -> Vec<u8> {
        encode(&[Token::Address(*self)])
    }
}

impl StateEncode for NonceKey {
    fn state_encode(&self) -> Vec<u8> {
        encode(&[Token::Address(self.sender), Token::Uint(self.key)])
    }
}

impl StateEncode for OwnerKey {
    fn state_encode(&self) -> Vec<u8> {
        encode(&[Token::Bytes(self.as_bytes().to_vec())])
    }
}

/// A conditional write: valid only if the key still holds `from` when the
/// batch is folded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedUpdate<K, V> {
    pub key: K,
    pub from: Option<V>,
    pub to: V,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: DeserializeOwned + Ord, V: DeserializeOwned"
))]
pub struct OffchainMap<K: Ord, V> {
    #[serde(with = "crate::store::entries")]
    settled: BTreeMap<K, V>,
    pending: Vec<StagedUpdate<K, V>>,
}

impl<K: Ord, V> Default for OffchainMap<K, V> {
    fn default() -> Self {
        Self {
            settled: BTreeMap::new(),
            pending: Vec::new(),
        }
    }
}

impl<K, V> OffchainMap<K, V>
where
    K: Ord + Clone + StateEncode + std::fmt::Debug,
    V: Clone + PartialEq + StateEncode + std::fmt::Debug,
{
    /// Latest known value, including writes that are staged but not settled.
    pub fn get(&self, key: &K) -> Option<V> {
        self.pending
            .iter()
            .rev()
            .find(|u| &u.key == key)
            .map(|u| u.to.clone())
            .or_else(|| self.settled.get(key).cloned())
    }

    /// Value as of the last accepted settlement.
    pub fn get_settled(&self, key: &K) -> Option<V> {
        self.settled.get(key).cloned()
    }

    /// Stages `key: from -> to`. Nothing is checked here; a stale `from`
    /// surfaces when the batch is folded.
    pub fn update(&mut self, key: K, from: Option<V>, to: V) {
        tracing::debug!(?key, ?from, ?to, "staging off-chain update");
        self.pending.push(StagedUpdate { key, from, to });
    }

    pub fn pending(&self) -> &[StagedUpdate<K, V>] {
        &self.pending
    }

    /// Applies the pending log, in staging order, over the committed snapshot.
    pub fn fold(&self) -> AaResult<BTreeMap<K, V>> {
        let mut folded = self.settled.clone();
        for (index, update) in self.pending.iter().enumerate() {
            let current = folded.get(&update.key);
            if current != update.from.as_ref() {
                return Err(AaError::SettlementProofInvalid(format!(
                    "staged update #{index} for {:?} expects {:?} but found {:?}",
                    update.key, update.from, current
                )));
            }
            folded.insert(update.key.clone(), update.to.clone());
        }
        Ok(folded)
    }

    fn commit(&mut self, folded: BTreeMap<K, V>) {
        self.settled = folded;
        self.pending.clear();
    }
}

fn map_root<K: StateEncode, V: StateEncode>(entries: &BTreeMap<K, V>) -> H256 {
    let mut preimage = Vec::with_capacity(entries.len() * 64);
    for (key, value) in entries {
        preimage.extend_from_slice(&keccak256(key.state_encode()));
        preimage.extend_from_slice(&keccak256(value.state_encode()));
    }
    keccak256(preimage).into()
}

/// Type-erased view of one map, so a contract can settle all of its maps as
/// one batch under one commitment.
pub trait StagedMap {
    fn settled_root(&self) -> H256;

    fn pending_len(&self) -> usize;

    /// Hash chain over the pending log, identifying the batch exactly.
    fn batch_digest(&self) -> H256;

    fn folded_root(&self) -> AaResult<H256>;

    fn apply_fold(&mut self) -> AaResult<()>;
}

impl<K, V> StagedMap for OffchainMap<K, V>
where
    K: Ord + Clone + StateEncode + std::fmt::Debug,
    V: Clone + PartialEq + StateEncode + std::fmt::Debug,
{
    fn settled_root(&self) -> H256 {
        map_root(&self.settled)
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn batch_digest(&self) -> H256 {
        let mut acc = [0u8; 32];
        for update in &self.pending {
            let mut preimage = Vec::with_capacity(32 * 4 + 1);
            preimage.extend_from_slice(&acc);
            preimage.extend_from_slice(&keccak256(update.key.state_encode()));
            match &update.from {
                Some(v) => {
                    preimage.push(1);
                    preimage.extend_from_slice(&keccak256(v.state_encode()));
                }
                None => preimage.push(0),
            }
            preimage.extend_from_slice(&keccak256(update.to.state_encode()));
            acc = keccak256(preimage);
        }
        H256(acc)
    }

    fn folded_root(&self) -> AaResult<H256> {
        Ok(map_root(&self.fold()?))
    }

    fn apply_fold(&mut self) -> AaResult<()> {
        let folded = self.fold()?;
        self.commit(folded);
        Ok(())
    }
}

/// On-chain anchor of a contract's off-chain state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCommitments {
    pub commitment: H256,
    /// Number of accepted settlements.
    pub settlements: u64,
}

fn scope_commitment(roots: &[H256]) -> H256 {
    let tokens = roots
        .iter()
        .enumerate()
        .map(|(id, root)| {
            Token::Tuple(vec![
                Token::Uint(id.into()),
                Token::FixedBytes(root.as_bytes().to_vec()),
            ])
        })
        .collect();
    keccak256(encode(&[Token::Array(tokens)])).into()
}

/// A contract's bundle of off-chain maps sharing one commitment.
pub trait OffchainState {
    fn maps(&self) -> Vec<&dyn StagedMap>;

    fn maps_mut(&mut self) -> Vec<&mut dyn StagedMap>;

    fn commitments(&self) -> &StateCommitments;

    fn commitments_mut(&mut self) -> &mut StateCommitments;

    /// Commitment over the committed snapshots of every map.
    fn settled_commitment(&self) -> H256 {
        let roots: Vec<H256> = self.maps().iter().map(|m| m.settled_root()).collect();
        scope_commitment(&roots)
    }

    fn pending_updates(&self) -> usize {
        self.maps().iter().map(|m| m.pending_len()).sum()
    }

    fn batch_digest(&self) -> H256 {
        let digests = self
            .maps()
            .iter()
            .map(|m| Token::FixedBytes(m.batch_digest().as_bytes().to_vec()))
            .collect();
        keccak256(encode(&[Token::Array(digests)])).into()
    }

    /// The public input a prover must attest to in order to settle the
    /// current pending batch. Fails if the batch cannot be folded.
    fn settlement_input(&self, contract: Address) -> AaResult<SettlementPublicInput> {
        let roots = self
            .maps()
            .iter()
            .map(|m| m.folded_root())
            .collect::<AaResult<Vec<_>>>()?;
        Ok(SettlementPublicInput {
            contract,
            prior_commitment: self.commitments().commitment,
            new_commitment: scope_commitment(&roots),
            batch_digest: self.batch_digest(),
            updates: self.pending_updates() as u64,
        })
    }

    /// Folds the pending batch into the committed snapshot if `proof`
    /// attests exactly this contract, this prior commitment and this batch.
    ///
    /// A batch is all or nothing, and nothing removes entries from the log.
    /// Once a staged write's `from` no longer matches at fold time, this
    /// contract cannot settle again: every later batch still carries it.
    fn settle(
        &mut self,
        contract: Address,
        proof: &SettlementProof,
        verifier: &dyn ProofVerifier,
    ) -> AaResult<H256> {
        let claimed = &proof.public_input;
        if !verifier.verify(&proof.proof, claimed) {
            return Err(AaError::SettlementProofInvalid(
                "proof does not verify against its public input".into(),
            ));
        }
        if claimed.contract != contract {
            return Err(AaError::SettlementProofInvalid(format!(
                "proof is for contract {:?}",
                claimed.contract
            )));
        }
        let current = self.commitments().commitment;
        if claimed.prior_commitment != current {
            return Err(AaError::SettlementProofInvalid(format!(
                "stale prior commitment {:?}, current is {:?}",
                claimed.prior_commitment, current
            )));
        }
        if claimed.batch_digest != self.batch_digest()
            || claimed.updates != self.pending_updates() as u64
        {
            return Err(AaError::SettlementProofInvalid(
                "proof does not cover the pending batch".into(),
            ));
        }
        let expected = self.settlement_input(contract)?;
        if expected.new_commitment != claimed.new_commitment {
            return Err(AaError::SettlementProofInvalid(
                "claimed commitment is not the fold of the pending batch".into(),
            ));
        }

        for map in self.maps_mut() {
            map.apply_fold()?;
        }
        let commitments = self.commitments_mut();
        commitments.commitment = claimed.new_commitment;
        commitments.settlements += 1;
        Ok(claimed.new_commitment)
    }
}
