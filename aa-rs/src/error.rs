use ethers::types::{Address, U256};

/// Every way a protocol call can abort.
///
/// Any of these aborts the whole enclosing transaction: staged off-chain
/// writes, ledger transfers and events are all discarded together.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AaError {
    /// `initialize` called on a contract whose fields are already set.
    #[error("contract {0:?} is already initialized")]
    AlreadyInitialized(Address),
    /// A method that needs an initialized contract was called before `initialize`.
    #[error("contract {0:?} is not initialized")]
    NotInitialized(Address),
    /// An EntryPoint-gated method was called by someone else.
    #[error("caller {caller:?} is not the entry point {entry_point:?}")]
    NotEntryPoint { caller: Address, entry_point: Address },
    /// The caller may not act on behalf of `account`.
    #[error("caller {caller:?} may not act for account {account:?}")]
    UnauthorizedCaller { caller: Address, account: Address },
    /// Signature verification returned false.
    #[error("invalid signature")]
    InvalidSignature,
    /// The supplied nonce is not the next expected one for its lane.
    #[error("nonce mismatch for {sender:?} key {key}: expected {expected}, got {actual}")]
    NonceMismatch {
        sender: Address,
        key: U256,
        expected: U256,
        actual: U256,
    },
    /// A debit exceeds the current balance.
    #[error("insufficient balance for {account:?}: available {available}, required {required}")]
    InsufficientBalance {
        account: Address,
        available: u64,
        required: u64,
    },
    /// No account is registered for the owner key.
    #[error("no account registered for owner {0}")]
    UnknownAccount(String),
    /// The settlement attestation does not cover the current pending batch.
    #[error("settlement proof rejected: {0}")]
    SettlementProofInvalid(String),
    /// The owner is already registered, or the account belongs to another entry point.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),
    /// A credit or a nonce bump overflowed.
    #[error("arithmetic overflow")]
    Overflow,
    /// No contract of the expected kind lives at the address.
    #[error("no {expected} contract at {address:?}")]
    UnknownContract {
        address: Address,
        expected: &'static str,
    },
    /// Deployment target already holds a program.
    #[error("address {0:?} already holds a contract")]
    ContractExists(Address),
    /// Malformed key or signature bytes.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

pub type AaResult<T> = Result<T, AaError>;
