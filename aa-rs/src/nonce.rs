use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{AaError, AaResult};
use crate::offchain::{OffchainMap, StagedMap};
use crate::types::NonceKey;

/// Next expected sequence number per nonce lane. Absent lanes start at 0.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NonceLedger {
    nonces: OffchainMap<NonceKey, U256>,
}

impl NonceLedger {
    pub fn get_nonce(&self, sender: Address, key: U256) -> U256 {
        self.nonces.get(&NonceKey { sender, key }).unwrap_or_default()
    }

    pub fn settled_nonce(&self, sender: Address, key: U256) -> U256 {
        self.nonces
            .get_settled(&NonceKey { sender, key })
            .unwrap_or_default()
    }

    /// Consumes `nonce` on lane `(sender, key)` if it is the next expected
    /// one, staging the lane's advance to `nonce + 1`.
    pub fn validate_and_update_nonce(
        &mut self,
        sender: Address,
        key: U256,
        nonce: U256,
    ) -> AaResult<()> {
        let lane = NonceKey { sender, key };
        let current = self.nonces.get(&lane);
        let expected = current.unwrap_or_default();
        if nonce != expected {
            return Err(AaError::NonceMismatch {
                sender,
                key,
                expected,
                actual: nonce,
            });
        }
        let next = nonce.checked_add(U256::one()).ok_or(AaError::Overflow)?;
        self.nonces.update(lane, current, next);
        Ok(())
    }

    /// Skips the next nonce of a lane. Returns the new expected nonce.
    pub fn increment(&mut self, sender: Address, key: U256) -> AaResult<U256> {
        let next = self.get_nonce(sender, key);
        self.validate_and_update_nonce(sender, key, next)?;
        Ok(self.get_nonce(sender, key))
    }

    pub(crate) fn map(&self) -> &dyn StagedMap {
        &self.nonces
    }

    pub(crate) fn map_mut(&mut self) -> &mut dyn StagedMap {
        &mut self.nonces
    }
}
