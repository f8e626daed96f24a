use crate::scanner::PendingScope;
use crate::state::FailureKind;
use ethers::types::{Address, H256};
use zkaa::{AaError, Chain, SettlementProver};

#[derive(Debug, Clone)]
pub struct SettledScope {
    pub scope: String,
    pub updates: usize,
    pub commitment: H256,
}

#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub scope: String,
    pub kind: FailureKind,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct SettleOutcome {
    pub stats: SettleStats,

    /// Scopes whose pending batch was folded this cycle.
    pub successes: Vec<SettledScope>,

    /// Failures that should be backoff-tracked by the caller.
    pub failures: Vec<FailureRecord>,
}

#[derive(Debug, Default, Clone)]
pub struct SettleStats {
    pub checked: usize,
    pub proved: usize,
    pub settled: usize,
    pub failed: usize,
    pub throttled: usize,
    pub updates_folded: usize,
}

fn classify(err: &AaError, stage: Stage) -> FailureKind {
    match (err, stage) {
        (AaError::SettlementProofInvalid(_), Stage::Prove) => FailureKind::StaleBatch,
        (AaError::SettlementProofInvalid(_), Stage::Submit) => FailureKind::ProofRejected,
        _ => FailureKind::Unknown,
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Prove,
    Submit,
}

/// Proves and settles each pending scope, one transaction per scope, in the
/// given order. At most `max_settlements` transactions are submitted.
pub fn settle_pending<P: SettlementProver>(
    chain: &mut Chain,
    pending: Vec<PendingScope>,
    prover: &P,
    sender: Address,
    max_settlements: usize,
    dry_run: bool,
) -> SettleOutcome {
    let mut outcome = SettleOutcome::default();
    let mut remaining_budget = max_settlements;

    for p in pending {
        outcome.stats.checked += 1;
        let key = p.scope.key();

        let input = match p.scope.settlement_input(chain.state()) {
            Ok(input) => input,
            Err(err) => {
                outcome.stats.failed += 1;
                tracing::warn!(scope = %key, updates = p.updates, error = %err, "pending batch cannot be folded");
                outcome.failures.push(FailureRecord {
                    scope: key,
                    kind: classify(&err, Stage::Prove),
                    reason: Some(err.to_string()),
                });
                continue;
            }
        };
        let proof = prover.prove(input);
        outcome.stats.proved += 1;

        if dry_run {
            tracing::info!(
                scope = %key,
                updates = p.updates,
                prior = ?input.prior_commitment,
                new = ?input.new_commitment,
                "dry-run: would settle"
            );
            continue;
        }

        if remaining_budget == 0 {
            outcome.stats.throttled += 1;
            tracing::info!(scope = %key, "settlement budget exhausted this cycle");
            continue;
        }
        remaining_budget -= 1;

        let scope = p.scope;
        match chain.transact(sender, |tx| scope.settle(tx, &proof)) {
            Ok(commitment) => {
                outcome.stats.settled += 1;
                outcome.stats.updates_folded += p.updates;
                tracing::info!(
                    scope = %key,
                    updates = p.updates,
                    prior = ?p.commitment,
                    commitment = ?commitment,
                    "settled"
                );
                outcome.successes.push(SettledScope {
                    scope: key,
                    updates: p.updates,
                    commitment,
                });
            }
            Err(err) => {
                outcome.stats.failed += 1;
                tracing::warn!(scope = %key, error = %err, "settlement rejected");
                outcome.failures.push(FailureRecord {
                    scope: key,
                    kind: classify(&err, Stage::Submit),
                    reason: Some(err.to_string()),
                });
            }
        }
    }

    outcome
}
