pub mod account;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod deposit;
pub mod encoding;
pub mod entry_point;
pub mod error;
pub mod events;
pub mod factory;
pub mod ledger;
pub mod nonce;
pub mod offchain;
pub mod proof;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use account::{AccountContract, SmartAccount};
pub use chain::{Chain, Tx, WorldState};
pub use crypto::{Curve, EcdsaSignature, EcdsaVerifier, OwnerKey, OwnerSigner, SignatureVerifier};
pub use entry_point::EntryPoint;
pub use error::{AaError, AaResult};
pub use factory::AccountFactory;
pub use proof::{DigestProver, ProofVerifier, SettlementProof, SettlementProver};
pub use types::{UserOperation, UserOperationCallData};
