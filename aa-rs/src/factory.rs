use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::account::AccountContract;
use crate::chain::{Tx, WorldState};
use crate::crypto::OwnerKey;
use crate::error::{AaError, AaResult};
use crate::events::Event;
use crate::ledger::ContractCode;
use crate::offchain::{OffchainMap, OffchainState, StagedMap, StateCommitments};
use crate::proof::{SettlementProof, SettlementPublicInput};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryState {
    entry_point: Address,
    commitments: StateCommitments,
    accounts: OffchainMap<OwnerKey, Address>,
}

impl FactoryState {
    fn genesis() -> Self {
        let mut state = Self {
            entry_point: Address::zero(),
            commitments: StateCommitments::default(),
            accounts: OffchainMap::default(),
        };
        state.commitments.commitment = state.settled_commitment();
        state
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }
}

impl OffchainState for FactoryState {
    fn maps(&self) -> Vec<&dyn StagedMap> {
        vec![&self.accounts as &dyn StagedMap]
    }

    fn maps_mut(&mut self) -> Vec<&mut dyn StagedMap> {
        vec![&mut self.accounts as &mut dyn StagedMap]
    }

    fn commitments(&self) -> &StateCommitments {
        &self.commitments
    }

    fn commitments_mut(&mut self) -> &mut StateCommitments {
        &mut self.commitments
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountFactory {
    address: Address,
}

impl AccountFactory {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn deploy(tx: &mut Tx<'_>, address: Address) -> AaResult<Self> {
        tx.deploy_factory(address, FactoryState::genesis())?;
        tracing::info!(factory = ?address, "account factory deployed");
        Ok(Self { address })
    }

    pub fn state<'s>(&self, state: &'s WorldState) -> AaResult<&'s FactoryState> {
        state.factory(self.address)
    }

    fn state_mut<'s>(&self, tx: &'s mut Tx<'_>) -> AaResult<&'s mut FactoryState> {
        tx.state_mut().factory_mut(self.address)
    }

    /// Entry point every registered account must be bound to.
    pub fn entry_point(&self, state: &WorldState) -> AaResult<Address> {
        let entry_point = self.state(state)?.entry_point;
        if entry_point.is_zero() {
            return Err(AaError::NotInitialized(self.address));
        }
        Ok(entry_point)
    }

    pub fn initialize(&self, tx: &mut Tx<'_>, entry_point: Address) -> AaResult<()> {
        if !self.state(tx.state())?.entry_point.is_zero() {
            return Err(AaError::AlreadyInitialized(self.address));
        }
        tx.state().entry_point(entry_point)?;
        self.state_mut(tx)?.entry_point = entry_point;
        tracing::info!(factory = ?self.address, entry_point = ?entry_point, "account factory initialized");
        Ok(())
    }

    /// Registers an initialized account under its owner key. The write is
    /// staged against "no account yet", so two registrations of one owner
    /// cannot both settle.
    pub fn add_account(&self, tx: &mut Tx<'_>, account: Address) -> AaResult<()> {
        let entry_point = self.entry_point(tx.state())?;
        if tx.state().ledger().verification_key_at(account)
            != Some(ContractCode::Account.verification_key())
        {
            return Err(AaError::UnknownContract {
                address: account,
                expected: ContractCode::Account.name(),
            });
        }
        let curve = tx.curve();
        let target = AccountContract::at(account).state(tx.state())?.clone();
        if !target.is_initialized(curve) {
            return Err(AaError::NotInitialized(account));
        }
        if target.entry_point != entry_point {
            return Err(AaError::DuplicateRegistration(format!(
                "account {account:?} is bound to entry point {:?}, factory uses {entry_point:?}",
                target.entry_point
            )));
        }

        let registry = &mut self.state_mut(tx)?.accounts;
        let current = registry.get(&target.owner);
        if let Some(existing) = current.filter(|a| !a.is_zero()) {
            return Err(AaError::DuplicateRegistration(format!(
                "owner {} already maps to {existing:?}",
                target.owner
            )));
        }
        registry.update(target.owner, current, account);

        tx.emit(
            self.address,
            Event::AccountAdded {
                sender: account,
                factory: self.address,
            },
        );
        tracing::info!(factory = ?self.address, account = ?account, "account registered");
        Ok(())
    }

    /// Deploys, initializes and registers an account in one go.
    pub fn deploy_account(
        &self,
        tx: &mut Tx<'_>,
        address: Address,
        owner: OwnerKey,
        prefund: u64,
        initial_balance: u64,
    ) -> AaResult<AccountContract> {
        let entry_point = self.entry_point(tx.state())?;
        let account = AccountContract::deploy(tx, address)?;
        account.initialize(tx, entry_point, owner, prefund, initial_balance)?;
        self.add_account(tx, address)?;
        Ok(account)
    }

    /// Account registered for `owner`, or the zero address.
    pub fn get_public_key(&self, state: &WorldState, owner: &OwnerKey) -> AaResult<Address> {
        Ok(self
            .state(state)?
            .accounts
            .get(owner)
            .unwrap_or_else(Address::zero))
    }

    pub fn get_settled_public_key(&self, state: &WorldState, owner: &OwnerKey) -> AaResult<Address> {
        Ok(self
            .state(state)?
            .accounts
            .get_settled(owner)
            .unwrap_or_else(Address::zero))
    }

    /// Like [`get_public_key`](Self::get_public_key) but fails on unknown owners.
    pub fn resolve_account(&self, state: &WorldState, owner: &OwnerKey) -> AaResult<Address> {
        let account = self.get_public_key(state, owner)?;
        if account.is_zero() {
            return Err(AaError::UnknownAccount(owner.to_string()));
        }
        Ok(account)
    }

    pub fn commitment(&self, state: &WorldState) -> AaResult<H256> {
        Ok(self.state(state)?.commitments.commitment)
    }

    pub fn pending_updates(&self, state: &WorldState) -> AaResult<usize> {
        Ok(self.state(state)?.pending_updates())
    }

    pub fn settlement_input(&self, state: &WorldState) -> AaResult<SettlementPublicInput> {
        self.state(state)?.settlement_input(self.address)
    }

    pub fn settle(&self, tx: &mut Tx<'_>, proof: &SettlementProof) -> AaResult<H256> {
        let verifier = tx.proofs();
        let address = self.address;
        let state = self.state_mut(tx)?;
        let updates = state.pending_updates();
        let commitment = state.settle(address, proof, verifier)?;
        tracing::info!(factory = ?address, updates, commitment = ?commitment, "registry settled");
        Ok(commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OwnerSigner;
    use crate::entry_point::EntryPoint;
    use crate::proof::{DigestProver, SettlementProver};
    use crate::test_utils::{Fixture, DEPLOYER};

    #[test]
    fn unregistered_owner_resolves_to_zero() {
        let fx = Fixture::new();
        let owner = OwnerSigner::random(fx.chain.curve()).owner_key();
        let state = fx.chain.state();
        assert_eq!(fx.factory.get_public_key(state, &owner).unwrap(), Address::zero());
        assert!(matches!(
            fx.factory.resolve_account(state, &owner),
            Err(AaError::UnknownAccount(_))
        ));
    }

    #[test]
    fn deployed_account_is_resolvable_before_and_after_settlement() {
        let mut fx = Fixture::new();
        let (account, signer) = fx.account(0, 0);
        let owner = signer.owner_key();
        assert_eq!(fx.factory.get_public_key(fx.chain.state(), &owner).unwrap(), account);
        assert_eq!(
            fx.factory.get_settled_public_key(fx.chain.state(), &owner).unwrap(),
            Address::zero()
        );

        fx.settle_factory().unwrap();
        let state = fx.chain.state();
        assert_eq!(fx.factory.get_settled_public_key(state, &owner).unwrap(), account);
        assert_eq!(fx.factory.resolve_account(state, &owner).unwrap(), account);
        assert_eq!(fx.factory.pending_updates(state).unwrap(), 0);
    }

    #[test]
    fn add_account_emits() {
        let mut fx = Fixture::new();
        let (account, _) = fx.account(0, 0);
        let last = fx.chain.events(Some(fx.factory.address())).last().map(|r| r.event.clone());
        assert_eq!(
            last,
            Some(Event::AccountAdded {
                sender: account,
                factory: fx.factory.address(),
            })
        );
    }

    #[test]
    fn same_owner_cannot_register_twice() {
        let mut fx = Fixture::new();
        let (_, signer) = fx.account(0, 0);
        let second = fx.next_address();
        let factory = fx.factory;
        let owner = signer.owner_key();
        let err = fx
            .chain
            .transact(DEPLOYER, |tx| factory.deploy_account(tx, second, owner, 0, 0))
            .unwrap_err();
        assert!(matches!(err, AaError::DuplicateRegistration(_)));
        assert!(fx.chain.state().account(second).is_err());
    }

    #[test]
    fn racing_registrations_cannot_both_settle() {
        let mut fx = Fixture::new();
        let owner = OwnerSigner::random(fx.chain.curve()).owner_key();
        let factory = fx.factory;
        let (first, second) = (fx.next_address(), fx.next_address());
        fx.chain
            .transact(DEPLOYER, |tx| factory.deploy_account(tx, first, owner.clone(), 0, 0))
            .unwrap();

        // A second writer working from the settled view stages a write that
        // also expects the owner to be unregistered. `add_account` reads the
        // staged view and refuses this, so the write is staged directly; on a
        // real deployment it comes from an aggregator with a stale view.
        let ep = fx.entry_point.address();
        fx.chain
            .transact(DEPLOYER, |tx| {
                let account = AccountContract::deploy(tx, second)?;
                account.initialize(tx, ep, owner.clone(), 0, 0)?;
                tx.state_mut()
                    .factory_mut(factory.address())?
                    .accounts
                    .update(owner.clone(), None, second);
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            factory.settlement_input(fx.chain.state()),
            Err(AaError::SettlementProofInvalid(_))
        ));
        assert!(fx.settle_factory().is_err());
        assert_eq!(
            factory.get_settled_public_key(fx.chain.state(), &owner).unwrap(),
            Address::zero()
        );

        // The stale write stays in the log, so later registrations never settle either.
        fx.account(0, 0);
        assert!(fx.settle_factory().is_err());
        assert_eq!(factory.pending_updates(fx.chain.state()).unwrap(), 3);
    }

    #[test]
    fn only_account_programs_can_register() {
        let mut fx = Fixture::new();
        let factory = fx.factory;
        let ep = fx.entry_point.address();
        let err = fx
            .chain
            .transact(DEPLOYER, |tx| factory.add_account(tx, ep))
            .unwrap_err();
        assert_eq!(
            err,
            AaError::UnknownContract {
                address: ep,
                expected: "account",
            }
        );
        assert_eq!(factory.pending_updates(fx.chain.state()).unwrap(), 0);
    }

    #[test]
    fn account_bound_to_other_entry_point_is_rejected() {
        let mut fx = Fixture::new();
        let other_ep = fx.next_address();
        let address = fx.next_address();
        let factory = fx.factory;
        let owner = OwnerSigner::random(fx.chain.curve()).owner_key();
        let err = fx
            .chain
            .transact(DEPLOYER, |tx| {
                EntryPoint::deploy(tx, other_ep)?;
                let account = AccountContract::deploy(tx, address)?;
                account.initialize(tx, other_ep, owner, 0, 0)?;
                factory.add_account(tx, address)
            })
            .unwrap_err();
        assert!(matches!(err, AaError::DuplicateRegistration(_)));
    }

    #[test]
    fn uninitialized_account_cannot_register() {
        let mut fx = Fixture::new();
        let address = fx.next_address();
        let factory = fx.factory;
        let err = fx
            .chain
            .transact(DEPLOYER, |tx| {
                AccountContract::deploy(tx, address)?;
                factory.add_account(tx, address)
            })
            .unwrap_err();
        assert_eq!(err, AaError::NotInitialized(address));
    }

    #[test]
    fn initialize_is_one_shot_and_required() {
        let mut fx = Fixture::new();
        let address = fx.next_address();
        let ep = fx.entry_point.address();
        let factory = fx
            .chain
            .transact(DEPLOYER, |tx| AccountFactory::deploy(tx, address))
            .unwrap();
        assert_eq!(
            factory.entry_point(fx.chain.state()),
            Err(AaError::NotInitialized(address))
        );
        fx.chain.transact(DEPLOYER, |tx| factory.initialize(tx, ep)).unwrap();
        assert_eq!(
            fx.chain.transact(DEPLOYER, |tx| factory.initialize(tx, ep)),
            Err(AaError::AlreadyInitialized(address))
        );
    }

    #[test]
    fn registry_settlement_is_independent_of_entry_point() {
        let mut fx = Fixture::new();
        fx.account(0, 0);
        let prover = DigestProver::default();
        let factory = fx.factory;
        let ep_input = fx.entry_point.settlement_input(fx.chain.state()).unwrap();
        let proof = prover.prove(ep_input);
        assert!(fx.chain.transact(DEPLOYER, |tx| factory.settle(tx, &proof)).is_err());
        fx.settle_factory().unwrap();
    }
}
