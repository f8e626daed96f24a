use crate::state::SettlerState;
use ethers::types::{Address, H256};
use zkaa::chain::{Tx, WorldState};
use zkaa::proof::{SettlementProof, SettlementPublicInput};
use zkaa::{AaResult, AccountFactory, Chain, EntryPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    EntryPoint,
    Factory,
}

/// A contract whose off-chain maps share one commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub kind: ScopeKind,
    pub address: Address,
}

impl Scope {
    pub fn key(&self) -> String {
        format!("{:#x}", self.address)
    }

    pub fn pending_updates(&self, state: &WorldState) -> AaResult<usize> {
        match self.kind {
            ScopeKind::EntryPoint => EntryPoint::at(self.address).pending_updates(state),
            ScopeKind::Factory => AccountFactory::at(self.address).pending_updates(state),
        }
    }

    pub fn commitment(&self, state: &WorldState) -> AaResult<H256> {
        match self.kind {
            ScopeKind::EntryPoint => EntryPoint::at(self.address).commitment(state),
            ScopeKind::Factory => AccountFactory::at(self.address).commitment(state),
        }
    }

    pub fn settlement_input(&self, state: &WorldState) -> AaResult<SettlementPublicInput> {
        match self.kind {
            ScopeKind::EntryPoint => EntryPoint::at(self.address).settlement_input(state),
            ScopeKind::Factory => AccountFactory::at(self.address).settlement_input(state),
        }
    }

    pub fn settle(&self, tx: &mut Tx<'_>, proof: &SettlementProof) -> AaResult<H256> {
        match self.kind {
            ScopeKind::EntryPoint => EntryPoint::at(self.address).settle(tx, proof),
            ScopeKind::Factory => AccountFactory::at(self.address).settle(tx, proof),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingScope {
    pub scope: Scope,
    pub updates: usize,
    pub commitment: H256,
}

/// Every entry point and factory on the chain with at least `min_updates`
/// staged writes.
pub fn scan_pending(chain: &Chain, min_updates: usize, state: &mut SettlerState) -> Vec<PendingScope> {
    let world = chain.state();
    let scopes = world
        .entry_point_addresses()
        .map(|address| Scope {
            kind: ScopeKind::EntryPoint,
            address,
        })
        .chain(world.factory_addresses().map(|address| Scope {
            kind: ScopeKind::Factory,
            address,
        }));

    let mut pending = Vec::new();
    let mut total = 0usize;
    for scope in scopes {
        total += 1;
        state.note_scope(&scope.key());
        let (updates, commitment) = match (scope.pending_updates(world), scope.commitment(world)) {
            (Ok(u), Ok(c)) => (u, c),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(scope = %scope.key(), error = %err, "failed to read scope; skipping");
                continue;
            }
        };
        if updates == 0 || updates < min_updates {
            tracing::debug!(scope = %scope.key(), updates, min_updates, "nothing to settle");
            continue;
        }
        pending.push(PendingScope {
            scope,
            updates,
            commitment,
        });
    }

    state.last_scanned_height = world.height();
    tracing::info!(
        height = state.last_scanned_height,
        scopes = total,
        pending = pending.len(),
        "scan complete"
    );
    pending
}
