use ethers::types::{Address, U256};
use std::sync::Arc;
use zkaa::{AccountFactory, Chain, Curve, DigestProver, EntryPoint, OwnerSigner, UserOperation};

pub const DEPLOYER: Address = Address::repeat_byte(0xd0);
pub const RELAYER: Address = Address::repeat_byte(0xbe);

/// Chain with an entry point, a factory and one account that has relayed a
/// single operation. Nothing is settled yet.
pub fn chain_with_account() -> (Chain, Address, Address, Address) {
    let ep_address = Address::repeat_byte(0xe0);
    let factory_address = Address::repeat_byte(0xfa);
    let account = Address::repeat_byte(0xac);
    let signer = OwnerSigner::random(Curve::Secp256k1);

    let mut chain = Chain::new(Curve::Secp256k1, Arc::new(DigestProver::default()));
    chain.fund(DEPLOYER, 1_000_000).unwrap();
    let owner = signer.owner_key();
    chain
        .transact(DEPLOYER, |tx| {
            let ep = EntryPoint::deploy(tx, ep_address)?;
            let factory = AccountFactory::deploy(tx, factory_address)?;
            factory.initialize(tx, ep.address())?;
            factory.deploy_account(tx, account, owner, 10_000, 10_000)?;
            Ok(())
        })
        .unwrap();

    let ep = EntryPoint::at(ep_address);
    let op = UserOperation::transfer(account, U256::zero(), U256::zero(), Address::repeat_byte(0x4e), 5, 10);
    let signature = signer.sign_hash(ep.get_user_op_hash(&op)).unwrap();
    chain
        .transact(RELAYER, |tx| ep.handle_op(tx, &op, &signature, RELAYER))
        .unwrap();

    (chain, ep_address, factory_address, account)
}
