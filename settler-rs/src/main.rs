mod config;
mod scanner;
mod settler;
mod state;
#[cfg(test)]
mod test_support;

use clap::Parser;
use config::SettlerConfig;
use eyre::{eyre, Result};
use settler::{settle_pending, SettleOutcome};
use state::{now_unix, SettlerState};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use zkaa::config::load_network;
use zkaa::store::ChainStore;
use zkaa::{Chain, DigestProver, EcdsaVerifier};

use fs2::FileExt;

fn compute_backoff_seconds(cfg: &SettlerConfig, consecutive_failures: u32, scope: &str) -> u64 {
    let max = cfg.backoff_max.as_secs().max(1);
    let base = cfg.backoff_base.as_secs().max(1).min(max);

    // base * 2^(consecutive_failures - 1), then clamped to max.
    let exp = consecutive_failures.saturating_sub(1).min(63);
    let mut backoff = base.saturating_mul(1u64 << exp).min(max);

    // Deterministic jitter in [0, jitter_max), still capped by max.
    let jitter_max = cfg.jitter.as_secs();
    if jitter_max > 0 {
        let seed = scope
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        backoff = backoff.saturating_add(seed % jitter_max).min(max);
    }

    backoff
}

#[derive(Parser, Debug)]
#[command(
    name = "zkaa-settler",
    version,
    about = "Settles pending off-chain nonce, deposit and registry writes"
)]
struct Args {
    /// Network file written by `zkaa genesis`.
    #[arg(long, env = "ZKAA_NETWORK", default_value = "network.json")]
    network: PathBuf,

    /// Override the chain state file (otherwise uses the network file).
    #[arg(long, env = "ZKAA_STATE_FILE")]
    chain_state_file: Option<PathBuf>,

    /// Sender of the settle transactions.
    #[arg(
        long,
        env = "ZKAA_SETTLER_SENDER",
        default_value = "0x0000000000000000000000000000000000000000"
    )]
    sender: String,

    /// Polling interval in seconds.
    #[arg(long, default_value_t = 10)]
    poll_seconds: u64,

    /// Only settle a contract once it has at least this many staged writes.
    #[arg(long, default_value_t = 1)]
    min_updates: usize,

    /// Max number of settle() transactions per cycle.
    #[arg(long, default_value_t = 16)]
    max_settlements_per_cycle: usize,

    /// Base backoff (seconds) after a failed settlement.
    #[arg(long, default_value_t = 30)]
    backoff_base_seconds: u64,

    /// Maximum backoff (seconds).
    #[arg(long, default_value_t = 3600)]
    backoff_max_seconds: u64,

    /// Add deterministic jitter in [0, jitterSeconds) to spread retries.
    #[arg(long, default_value_t = 10)]
    jitter_seconds: u64,

    /// Ignore persisted backoff and retry everything every cycle.
    #[arg(long)]
    ignore_backoff: bool,

    /// Where to store settler state (scan height, backoff).
    #[arg(long, default_value = "settler-rs/state/settler.json")]
    state_file: PathBuf,

    /// Run a single scan+settle cycle and exit.
    #[arg(long)]
    once: bool,

    /// Build attestations but do not submit them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let network = load_network(&args.network, args.chain_state_file.clone())
        .map_err(|e| eyre!("{e:#}"))?;

    let ignore_backoff = args.ignore_backoff;

    let cfg = SettlerConfig::from_cli_and_network(
        &network,
        &args.sender,
        args.poll_seconds,
        args.min_updates,
        args.max_settlements_per_cycle,
        args.state_file,
        args.backoff_base_seconds,
        args.backoff_max_seconds,
        args.jitter_seconds,
        args.once,
        args.dry_run,
    )?;

    if let Some(parent) = cfg.state_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| eyre!("failed to create state directory {}: {e}", parent.display()))?;
        }
    }

    // Single-instance guard: lock alongside the settler state file.
    let lock_path = cfg.state_file.with_extension("lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
    lock_file.try_lock_exclusive().map_err(|e| {
        eyre!(
            "settler already running or lock unavailable ({}): {e}",
            lock_path.display()
        )
    })?;
    let _lock_guard = lock_file;

    tracing::info!(
        curve = %cfg.curve,
        chain_state = %cfg.chain_state_file.display(),
        sender = ?cfg.sender,
        min_updates = cfg.min_updates,
        dry_run = cfg.dry_run,
        ignore_backoff,
        once = cfg.once,
        "settler starting"
    );

    let store = ChainStore::new(cfg.chain_state_file.clone());
    let prover = DigestProver::new(cfg.prover_key);
    let mut state = SettlerState::load_or_init(&cfg.state_file)?;

    loop {
        if let Err(err) = run_cycle(&cfg, &store, &prover, &mut state, ignore_backoff) {
            if cfg.once {
                return Err(err);
            }
            tracing::warn!(error = %err, "cycle failed");
        }

        if cfg.once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.poll_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

fn run_cycle(
    cfg: &SettlerConfig,
    store: &ChainStore,
    prover: &DigestProver,
    state: &mut SettlerState,
    ignore_backoff: bool,
) -> Result<()> {
    // Hold the chain lock for the whole cycle so CLI writes cannot interleave
    // between proving and settling.
    let _chain_lock = store.lock()?;
    let snapshot = store.load()?;
    if snapshot.curve != cfg.curve {
        return Err(eyre!(
            "chain state uses {} but network file says {}",
            snapshot.curve,
            cfg.curve
        ));
    }
    let mut chain = Chain::from_snapshot(
        snapshot,
        Arc::new(EcdsaVerifier::new(cfg.curve)),
        Arc::new(*prover),
    );

    let now = now_unix();
    let height = chain.state().height();
    if height == state.last_scanned_height
        && !state.backlog
        && !state.has_due_retry(now)
        && !ignore_backoff
    {
        tracing::debug!(height, "no new transactions since last scan");
        return Ok(());
    }

    let pending = scanner::scan_pending(&chain, cfg.min_updates, state);
    let total_pending = pending.len();
    let mut skipped_backoff = 0usize;
    let eligible: Vec<_> = pending
        .into_iter()
        .filter(|p| {
            if !ignore_backoff && state.should_skip_due_to_backoff(&p.scope.key(), now) {
                skipped_backoff += 1;
                return false;
            }
            true
        })
        .collect();

    if eligible.is_empty() {
        tracing::info!(total_pending, skipped_backoff, "nothing eligible this cycle");
        state.backlog = false;
        state.save(&cfg.state_file)?;
        return Ok(());
    }

    let outcome = settle_pending(
        &mut chain,
        eligible,
        prover,
        cfg.sender,
        cfg.max_settlements_per_cycle,
        cfg.dry_run,
    );

    let SettleOutcome {
        stats,
        successes,
        failures,
    } = outcome;

    // Dry runs persist scan progress only.
    if !cfg.dry_run {
        if !successes.is_empty() {
            store.save(&chain.snapshot())?;
        }

        for s in &successes {
            tracing::debug!(scope = %s.scope, updates = s.updates, commitment = ?s.commitment, "recording settlement");
            state.note_success(&s.scope);
        }

        for f in failures {
            let prev = state
                .retries
                .get(&f.scope)
                .map(|r| r.consecutive_failures)
                .unwrap_or(0);
            let consecutive = prev.saturating_add(1);
            let backoff_s = compute_backoff_seconds(cfg, consecutive, &f.scope);
            let next_retry_at = now.saturating_add(backoff_s);

            tracing::warn!(
                scope = %f.scope,
                kind = ?f.kind,
                consecutive,
                backoff_s,
                next_retry_at,
                reason = f.reason.as_deref().unwrap_or(""),
                "settlement failed; backing off"
            );

            state.note_failure(&f.scope, f.kind, next_retry_at, f.reason);
        }
    }
    // Our own settle transactions moved the height; nothing new to scan
    // unless the budget left scopes behind.
    state.last_scanned_height = chain.state().height();
    state.backlog = stats.throttled > 0;
    state.save(&cfg.state_file)?;

    tracing::info!(
        ?stats,
        skipped_backoff,
        settled_total = state.settled_total,
        "cycle complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::chain_with_account;
    use ethers::types::{Address, H256};
    use std::time::Duration;
    use zkaa::config::Network;
    use zkaa::{AccountFactory, Curve, EntryPoint};

    fn cfg(dir: &std::path::Path, max_backoff: u64, jitter: u64) -> SettlerConfig {
        cfg_with_budget(dir, max_backoff, jitter, 8)
    }

    fn cfg_with_budget(
        dir: &std::path::Path,
        max_backoff: u64,
        jitter: u64,
        budget: usize,
    ) -> SettlerConfig {
        let network = Network {
            curve: Curve::Secp256k1,
            state_file: dir.join("chain.json"),
            entry_point: Address::repeat_byte(0xe0),
            factory: Address::repeat_byte(0xfa),
            prover_key: H256::zero(),
        };
        SettlerConfig::from_cli_and_network(
            &network,
            "0x0000000000000000000000000000000000000000",
            1,
            1,
            budget,
            dir.join("settler.json"),
            10,
            max_backoff,
            jitter,
            true,
            false,
        )
        .unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path(), 100, 0);
        assert_eq!(compute_backoff_seconds(&cfg, 1, "0xaa"), 10);
        assert_eq!(compute_backoff_seconds(&cfg, 2, "0xaa"), 20);
        assert_eq!(compute_backoff_seconds(&cfg, 4, "0xaa"), 80);
        assert_eq!(compute_backoff_seconds(&cfg, 5, "0xaa"), 100);
        assert_eq!(compute_backoff_seconds(&cfg, u32::MAX, "0xaa"), 100);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path(), 1_000, 7);
        let a = compute_backoff_seconds(&cfg, 1, "0xaa");
        assert_eq!(a, compute_backoff_seconds(&cfg, 1, "0xaa"));
        assert!((10..17).contains(&a));
        assert_eq!(cfg.jitter, Duration::from_secs(7));
    }

    #[test]
    fn cycle_settles_the_stored_chain() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path(), 100, 0);
        let (chain, ep, _, account) = chain_with_account();
        let store = ChainStore::new(cfg.chain_state_file.clone());
        store.save(&chain.snapshot()).unwrap();

        let mut state = SettlerState::default();
        run_cycle(&cfg, &store, &DigestProver::default(), &mut state, false).unwrap();
        assert_eq!(state.settled_total, 2);

        let reloaded = store.load().unwrap();
        let chain = Chain::from_snapshot(
            reloaded,
            Arc::new(EcdsaVerifier::new(Curve::Secp256k1)),
            Arc::new(DigestProver::default()),
        );
        let ep = EntryPoint::at(ep);
        assert_eq!(ep.pending_updates(chain.state()).unwrap(), 0);
        assert_eq!(ep.settled_balance_of(chain.state(), account).unwrap(), 9_990);

        // Nothing new: the next cycle is a no-op.
        let height = state.last_scanned_height;
        run_cycle(&cfg, &store, &DigestProver::default(), &mut state, false).unwrap();
        assert_eq!(state.last_scanned_height, height);
        assert_eq!(state.settled_total, 2);
    }

    #[test]
    fn throttled_scope_is_settled_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_with_budget(dir.path(), 100, 0, 1);
        let (chain, ep, factory, _) = chain_with_account();
        let store = ChainStore::new(cfg.chain_state_file.clone());
        store.save(&chain.snapshot()).unwrap();

        let mut state = SettlerState::default();
        run_cycle(&cfg, &store, &DigestProver::default(), &mut state, false).unwrap();
        assert_eq!(state.settled_total, 1);
        assert!(state.backlog);

        run_cycle(&cfg, &store, &DigestProver::default(), &mut state, false).unwrap();
        assert_eq!(state.settled_total, 2);
        assert!(!state.backlog);

        let chain = Chain::from_snapshot(
            store.load().unwrap(),
            Arc::new(EcdsaVerifier::new(Curve::Secp256k1)),
            Arc::new(DigestProver::default()),
        );
        assert_eq!(EntryPoint::at(ep).pending_updates(chain.state()).unwrap(), 0);
        assert_eq!(AccountFactory::at(factory).pending_updates(chain.state()).unwrap(), 0);
    }
}
