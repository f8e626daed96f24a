use ethers::types::{Address, H256};
use eyre::{eyre, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};
use zkaa::config::Network;
use zkaa::Curve;

#[derive(Debug, Clone)]
pub struct SettlerConfig {
    pub curve: Curve,

    /// Chain state shared with the `zkaa` CLI.
    pub chain_state_file: PathBuf,

    /// Key of the local attestations; must match the network's.
    pub prover_key: H256,

    /// Transaction sender of the settle calls.
    pub sender: Address,

    pub poll_interval: Duration,

    /// Scopes with fewer staged writes wait for a later cycle.
    pub min_updates: usize,

    /// Max number of settle() transactions per cycle.
    pub max_settlements_per_cycle: usize,

    /// Settler bookkeeping (scan height, backoff), separate from the chain.
    pub state_file: PathBuf,

    pub backoff_base: Duration,
    pub backoff_max: Duration,

    /// Deterministic jitter window to spread retries.
    pub jitter: Duration,

    pub once: bool,
    pub dry_run: bool,
}

impl SettlerConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli_and_network(
        network: &Network,
        sender: &str,
        poll_seconds: u64,
        min_updates: usize,
        max_settlements_per_cycle: usize,
        state_file: PathBuf,
        backoff_base_seconds: u64,
        backoff_max_seconds: u64,
        jitter_seconds: u64,
        once: bool,
        dry_run: bool,
    ) -> Result<Self> {
        let sender =
            Address::from_str(sender).map_err(|e| eyre!("invalid sender address '{sender}': {e}"))?;

        if max_settlements_per_cycle == 0 {
            return Err(eyre!("max settlements per cycle must be > 0"));
        }

        if state_file == network.state_file {
            return Err(eyre!(
                "settler state file must differ from the chain state file ({})",
                network.state_file.display()
            ));
        }

        if network.prover_key.is_zero() {
            tracing::warn!("network proverKey is zero; anyone can produce accepted settlements");
        }

        if backoff_max_seconds > 0 && backoff_base_seconds > backoff_max_seconds {
            tracing::warn!(
                base = backoff_base_seconds,
                max = backoff_max_seconds,
                "backoff base > max; clamping base to max"
            );
        }

        Ok(Self {
            curve: network.curve,
            chain_state_file: network.state_file.clone(),
            prover_key: network.prover_key,
            sender,
            poll_interval: Duration::from_secs(poll_seconds.max(1)),
            min_updates: min_updates.max(1),
            max_settlements_per_cycle,
            state_file,
            backoff_max: Duration::from_secs(backoff_max_seconds.max(1)),
            backoff_base: Duration::from_secs(
                backoff_base_seconds.max(1).min(backoff_max_seconds.max(1)),
            ),
            jitter: Duration::from_secs(jitter_seconds),
            once,
            dry_run,
        })
    }
}
