use std::collections::BTreeMap;
use std::sync::Arc;

use ethers::types::{Address, H256, U256};

use crate::chain::Chain;
use crate::crypto::{Curve, OwnerSigner};
use crate::entry_point::EntryPoint;
use crate::error::AaResult;
use crate::factory::AccountFactory;
use crate::proof::{DigestProver, SettlementProver};
use crate::types::{UserOperation, Withdrawal};

pub const DEPLOYER: Address = Address::repeat_byte(0xd0);
pub const BENEFICIARY: Address = Address::repeat_byte(0xbe);
pub const RECIPIENT: Address = Address::repeat_byte(0x4e);

const ENTRY_POINT: Address = Address::repeat_byte(0xe0);
const FACTORY: Address = Address::repeat_byte(0xfa);

/// A chain with a funded deployer, an entry point and an initialized factory.
pub struct Fixture {
    pub chain: Chain,
    pub entry_point: EntryPoint,
    pub factory: AccountFactory,
    pub prover: DigestProver,
    signers: BTreeMap<Address, OwnerSigner>,
    next: u64,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_curve(Curve::Secp256k1)
    }

    pub fn with_curve(curve: Curve) -> Self {
        let prover = DigestProver::default();
        let mut chain = Chain::new(curve, Arc::new(prover));
        chain.fund(DEPLOYER, 1_000_000_000_000).unwrap();
        let (entry_point, factory) = chain
            .transact(DEPLOYER, |tx| {
                let entry_point = EntryPoint::deploy(tx, ENTRY_POINT)?;
                let factory = AccountFactory::deploy(tx, FACTORY)?;
                factory.initialize(tx, ENTRY_POINT)?;
                Ok((entry_point, factory))
            })
            .unwrap();
        Self {
            chain,
            entry_point,
            factory,
            prover,
            signers: BTreeMap::new(),
            next: 1,
        }
    }

    pub fn next_address(&mut self) -> Address {
        self.next += 1;
        Address::from_low_u64_be(0x1000 + self.next)
    }

    /// Deploys and registers an account with a fresh owner, paid by the deployer.
    pub fn account(&mut self, prefund: u64, initial_balance: u64) -> (Address, OwnerSigner) {
        let signer = OwnerSigner::random(self.chain.curve());
        let address = self.next_address();
        let factory = self.factory;
        let owner = signer.owner_key();
        self.chain
            .transact(DEPLOYER, |tx| {
                factory.deploy_account(tx, address, owner, prefund, initial_balance)
            })
            .unwrap();
        self.signers.insert(address, signer.clone());
        (address, signer)
    }

    pub fn send(&mut self, account: Address, nonce: u64, amount: u64, fee: u64) -> AaResult<H256> {
        self.send_on_lane(account, U256::zero(), nonce, amount, fee)
    }

    /// Signs a transfer to [`RECIPIENT`] with the account's owner and relays it.
    pub fn send_on_lane(
        &mut self,
        account: Address,
        key: U256,
        nonce: u64,
        amount: u64,
        fee: u64,
    ) -> AaResult<H256> {
        let op = UserOperation::transfer(account, key, nonce.into(), RECIPIENT, amount, fee);
        let signature = self.signers[&account].sign_hash(self.entry_point.get_user_op_hash(&op))?;
        let ep = self.entry_point;
        self.chain
            .transact(BENEFICIARY, |tx| ep.handle_op(tx, &op, &signature, BENEFICIARY))
    }

    pub fn withdraw(
        &mut self,
        account: Address,
        signer: &OwnerSigner,
        recipient: Address,
        amount: u64,
    ) -> AaResult<()> {
        let digest = Withdrawal {
            account,
            recipient,
            amount,
        }
        .hash();
        let signature = signer.sign_hash(digest)?;
        let ep = self.entry_point;
        self.chain
            .transact(DEPLOYER, |tx| ep.withdraw_to(tx, account, recipient, amount, &signature))
    }

    pub fn settle_entry_point(&mut self) -> AaResult<H256> {
        let proof = self
            .prover
            .prove(self.entry_point.settlement_input(self.chain.state())?);
        let ep = self.entry_point;
        self.chain.transact(DEPLOYER, |tx| ep.settle(tx, &proof))
    }

    pub fn settle_factory(&mut self) -> AaResult<H256> {
        let proof = self
            .prover
            .prove(self.factory.settlement_input(self.chain.state())?);
        let factory = self.factory;
        self.chain.transact(DEPLOYER, |tx| factory.settle(tx, &proof))
    }
}
