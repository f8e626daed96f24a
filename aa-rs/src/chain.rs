use std::collections::BTreeMap;
use std::sync::Arc;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::account::AccountState;
use crate::crypto::{Curve, EcdsaVerifier, SignatureVerifier};
use crate::entry_point::EntryPointState;
use crate::error::{AaError, AaResult};
use crate::events::Event;
use crate::factory::FactoryState;
use crate::ledger::{ContractCode, Ledger};
use crate::proof::ProofVerifier;
use crate::store::ChainSnapshot;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Height of the transaction that emitted the event.
    pub height: u64,
    pub emitter: Address,
    #[serde(flatten)]
    pub event: Event,
}

/// Everything a transaction can touch. Cloned as a checkpoint before each
/// transaction and restored if the transaction fails.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    ledger: Ledger,
    #[serde(with = "crate::store::entries")]
    entry_points: BTreeMap<Address, EntryPointState>,
    #[serde(with = "crate::store::entries")]
    accounts: BTreeMap<Address, AccountState>,
    #[serde(with = "crate::store::entries")]
    factories: BTreeMap<Address, FactoryState>,
    events: Vec<EventRecord>,
    height: u64,
}

fn unknown(address: Address, code: ContractCode) -> AaError {
    AaError::UnknownContract {
        address,
        expected: code.name(),
    }
}

impl WorldState {
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn balance(&self, address: Address) -> u64 {
        self.ledger.balance(address)
    }

    pub fn entry_point(&self, address: Address) -> AaResult<&EntryPointState> {
        self.entry_points
            .get(&address)
            .ok_or_else(|| unknown(address, ContractCode::EntryPoint))
    }

    pub fn account(&self, address: Address) -> AaResult<&AccountState> {
        self.accounts
            .get(&address)
            .ok_or_else(|| unknown(address, ContractCode::Account))
    }

    pub fn factory(&self, address: Address) -> AaResult<&FactoryState> {
        self.factories
            .get(&address)
            .ok_or_else(|| unknown(address, ContractCode::AccountFactory))
    }

    pub fn entry_point_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.entry_points.keys().copied()
    }

    pub fn factory_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.factories.keys().copied()
    }

    pub(crate) fn entry_point_mut(&mut self, address: Address) -> AaResult<&mut EntryPointState> {
        self.entry_points
            .get_mut(&address)
            .ok_or_else(|| unknown(address, ContractCode::EntryPoint))
    }

    pub(crate) fn account_mut(&mut self, address: Address) -> AaResult<&mut AccountState> {
        self.accounts
            .get_mut(&address)
            .ok_or_else(|| unknown(address, ContractCode::Account))
    }

    pub(crate) fn factory_mut(&mut self, address: Address) -> AaResult<&mut FactoryState> {
        self.factories
            .get_mut(&address)
            .ok_or_else(|| unknown(address, ContractCode::AccountFactory))
    }
}

/// Call context of one transaction.
///
/// `sender` signed the transaction. `caller` is whoever invoked the code that
/// is running now: the sender at the top level, or a contract address inside
/// a cross-contract call made through [`Tx::call`].
pub struct Tx<'a> {
    state: &'a mut WorldState,
    sender: Address,
    caller: Address,
    curve: Curve,
    signatures: &'a dyn SignatureVerifier,
    proofs: &'a dyn ProofVerifier,
}

impl<'a> Tx<'a> {
    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn caller(&self) -> Address {
        self.caller
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn state(&self) -> &WorldState {
        &*self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut WorldState {
        &mut *self.state
    }

    pub(crate) fn signatures(&self) -> &'a dyn SignatureVerifier {
        self.signatures
    }

    pub(crate) fn proofs(&self) -> &'a dyn ProofVerifier {
        self.proofs
    }

    /// Runs `f` as a call issued by contract `from`.
    pub(crate) fn call<T>(
        &mut self,
        from: Address,
        f: impl FnOnce(&mut Self) -> AaResult<T>,
    ) -> AaResult<T> {
        let outer = std::mem::replace(&mut self.caller, from);
        let result = f(self);
        self.caller = outer;
        result
    }

    /// Moves native funds out of the transaction sender.
    pub fn pay(&mut self, to: Address, amount: u64) -> AaResult<()> {
        self.state.ledger.transfer(self.sender, to, amount)
    }

    /// Moves native funds. Contracts only pass their own address or the
    /// transaction sender as `from`.
    pub(crate) fn transfer(&mut self, from: Address, to: Address, amount: u64) -> AaResult<()> {
        self.state.ledger.transfer(from, to, amount)
    }

    pub(crate) fn deploy_entry_point(&mut self, address: Address, state: EntryPointState) -> AaResult<()> {
        self.state.ledger.deploy(address, ContractCode::EntryPoint)?;
        self.state.entry_points.insert(address, state);
        Ok(())
    }

    pub(crate) fn deploy_account(&mut self, address: Address, state: AccountState) -> AaResult<()> {
        self.state.ledger.deploy(address, ContractCode::Account)?;
        self.state.accounts.insert(address, state);
        Ok(())
    }

    pub(crate) fn deploy_factory(&mut self, address: Address, state: FactoryState) -> AaResult<()> {
        self.state.ledger.deploy(address, ContractCode::AccountFactory)?;
        self.state.factories.insert(address, state);
        Ok(())
    }

    pub(crate) fn emit(&mut self, emitter: Address, event: Event) {
        tracing::debug!(emitter = ?emitter, ?event, "event");
        let height = self.state.height;
        self.state.events.push(EventRecord {
            height,
            emitter,
            event,
        });
    }
}

pub struct Chain {
    curve: Curve,
    state: WorldState,
    signatures: Arc<dyn SignatureVerifier>,
    proofs: Arc<dyn ProofVerifier>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("curve", &self.curve)
            .field("height", &self.state.height)
            .finish_non_exhaustive()
    }
}

impl Chain {
    /// Empty chain whose signatures are checked with ECDSA over `curve`.
    pub fn new(curve: Curve, proofs: Arc<dyn ProofVerifier>) -> Self {
        Self::with_verifiers(curve, Arc::new(EcdsaVerifier::new(curve)), proofs)
    }

    pub fn with_verifiers(
        curve: Curve,
        signatures: Arc<dyn SignatureVerifier>,
        proofs: Arc<dyn ProofVerifier>,
    ) -> Self {
        Self {
            curve,
            state: WorldState::default(),
            signatures,
            proofs,
        }
    }

    pub fn from_snapshot(
        snapshot: ChainSnapshot,
        signatures: Arc<dyn SignatureVerifier>,
        proofs: Arc<dyn ProofVerifier>,
    ) -> Self {
        Self {
            curve: snapshot.curve,
            state: snapshot.state,
            signatures,
            proofs,
        }
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            curve: self.curve,
            state: self.state.clone(),
        }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn signature_verifier(&self) -> Arc<dyn SignatureVerifier> {
        self.signatures.clone()
    }

    pub fn proof_verifier(&self) -> Arc<dyn ProofVerifier> {
        self.proofs.clone()
    }

    pub fn balance(&self, address: Address) -> u64 {
        self.state.balance(address)
    }

    /// Runs `f` as one transaction signed by `sender`. Either every effect of
    /// `f` is kept, or, if it returns `Err`, none is.
    pub fn transact<T>(
        &mut self,
        sender: Address,
        f: impl FnOnce(&mut Tx<'_>) -> AaResult<T>,
    ) -> AaResult<T> {
        let checkpoint = self.state.clone();
        let mut tx = Tx {
            state: &mut self.state,
            sender,
            caller: sender,
            curve: self.curve,
            signatures: self.signatures.as_ref(),
            proofs: self.proofs.as_ref(),
        };
        match f(&mut tx) {
            Ok(out) => {
                self.state.height += 1;
                Ok(out)
            }
            Err(err) => {
                tracing::debug!(sender = ?sender, error = %err, "transaction reverted");
                self.state = checkpoint;
                Err(err)
            }
        }
    }

    /// Credits `to` with newly created funds.
    pub fn fund(&mut self, to: Address, amount: u64) -> AaResult<()> {
        self.state.ledger.mint(to, amount)?;
        self.state.height += 1;
        Ok(())
    }

    /// Audit log, optionally restricted to one emitting contract.
    pub fn events(&self, emitter: Option<Address>) -> Vec<&EventRecord> {
        self.state
            .events
            .iter()
            .filter(|r| emitter.map_or(true, |e| r.emitter == e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::DigestProver;

    fn chain() -> Chain {
        Chain::new(Curve::Secp256k1, Arc::new(DigestProver::default()))
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let mut chain = chain();
        let (alice, bob) = (Address::repeat_byte(1), Address::repeat_byte(2));
        chain.fund(alice, 100).unwrap();
        let height = chain.state().height();

        let err = chain
            .transact(alice, |tx| {
                tx.pay(bob, 60)?;
                tx.emit(alice, Event::Deposited { account: bob, amount: 60 });
                tx.pay(bob, 60)
            })
            .unwrap_err();
        assert!(matches!(err, AaError::InsufficientBalance { .. }));
        assert_eq!(chain.balance(alice), 100);
        assert_eq!(chain.balance(bob), 0);
        assert!(chain.events(None).is_empty());
        assert_eq!(chain.state().height(), height);
    }

    #[test]
    fn call_swaps_caller_and_restores_it() {
        let mut chain = chain();
        let (alice, contract) = (Address::repeat_byte(1), Address::repeat_byte(2));
        chain
            .transact(alice, |tx| {
                assert_eq!(tx.caller(), alice);
                let inner = tx.call(contract, |tx| Ok((tx.sender(), tx.caller())))?;
                assert_eq!(inner, (alice, contract));
                assert_eq!(tx.caller(), alice);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn call_restores_caller_on_error() {
        let mut chain = chain();
        let (alice, contract) = (Address::repeat_byte(1), Address::repeat_byte(2));
        chain
            .transact(alice, |tx| {
                let _ = tx.call(contract, |_| Err::<(), _>(AaError::Overflow));
                assert_eq!(tx.caller(), alice);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn events_filter_by_emitter() {
        let mut chain = chain();
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        chain
            .transact(a, |tx| {
                tx.emit(a, Event::Deposited { account: a, amount: 1 });
                tx.emit(b, Event::Deposited { account: b, amount: 2 });
                Ok(())
            })
            .unwrap();
        assert_eq!(chain.events(None).len(), 2);
        let only_b = chain.events(Some(b));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].emitter, b);
    }

    #[test]
    fn unknown_contract_is_typed() {
        let chain = chain();
        let err = chain.state().entry_point(Address::repeat_byte(9)).unwrap_err();
        assert!(matches!(err, AaError::UnknownContract { expected: "entry point", .. }));
    }
}
