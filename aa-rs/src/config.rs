use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::crypto::Curve;
use crate::encoding::{fmt_address, fmt_h256, parse_h256};

/// On-disk network description written by `zkaa genesis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRaw {
    pub curve: String,
    pub state_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file_env_var: Option<String>,
    pub entry_point: String,
    pub factory: String,
    /// Shared key of the local settlement attestations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prover_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub curve: Curve,
    pub state_file: PathBuf,
    pub entry_point: Address,
    pub factory: Address,
    pub prover_key: H256,
}

impl Network {
    pub fn to_raw(&self) -> NetworkRaw {
        NetworkRaw {
            curve: self.curve.to_string(),
            state_file: self.state_file.display().to_string(),
            state_file_env_var: None,
            entry_point: fmt_address(self.entry_point),
            factory: fmt_address(self.factory),
            prover_key: Some(fmt_h256(self.prover_key)),
        }
    }
}

/// Loads a network file. The state file comes from, in order: `state_override`,
/// the env var named by `stateFileEnvVar`, the file itself. Relative state
/// paths resolve against the network file's directory.
pub fn load_network(path: &Path, state_override: Option<PathBuf>) -> Result<Network> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read network json at {}", path.display()))?;
    let raw: NetworkRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse network json at {}", path.display()))?;

    let state_file = if let Some(state) = state_override {
        state
    } else if let Some(env_var) = raw.state_file_env_var.as_deref() {
        env::var(env_var)
            .map(PathBuf::from)
            .unwrap_or_else(|_| relative_to(path, &raw.state_file))
    } else {
        relative_to(path, &raw.state_file)
    };

    let curve = raw
        .curve
        .parse::<Curve>()
        .map_err(|e| anyhow!("invalid curve: {e}"))?;
    let entry_point = parse_addr(&raw.entry_point).context("invalid entryPoint address")?;
    let factory = parse_addr(&raw.factory).context("invalid factory address")?;
    let prover_key = match raw.prover_key.as_deref() {
        Some(k) => parse_h256(k).context("invalid proverKey")?,
        None => H256::zero(),
    };

    Ok(Network {
        curve,
        state_file,
        entry_point,
        factory,
        prover_key,
    })
}

pub fn write_network(path: &Path, raw: &NetworkRaw) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(raw)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Resolves a state path from a network file against the file's directory.
pub fn relative_to(network_file: &Path, state_file: &str) -> PathBuf {
    let state = PathBuf::from(state_file);
    if state.is_absolute() {
        return state;
    }
    match network_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(state),
        _ => state,
    }
}

pub fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> NetworkRaw {
        NetworkRaw {
            curve: "secp256r1".into(),
            state_file: "chain.json".into(),
            state_file_env_var: None,
            entry_point: fmt_address(Address::repeat_byte(0xe0)),
            factory: fmt_address(Address::repeat_byte(0xfa)),
            prover_key: None,
        }
    }

    #[test]
    fn state_file_resolves_next_to_network_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        write_network(&path, &raw()).unwrap();

        let net = load_network(&path, None).unwrap();
        assert_eq!(net.curve, Curve::Secp256r1);
        assert_eq!(net.state_file, dir.path().join("chain.json"));
        assert_eq!(net.entry_point, Address::repeat_byte(0xe0));
        assert_eq!(net.prover_key, H256::zero());
    }

    #[test]
    fn override_beats_env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        let var = "ZKAA_TEST_STATE_FILE_OVERRIDE";
        let mut r = raw();
        r.state_file_env_var = Some(var.into());
        write_network(&path, &r).unwrap();

        env::set_var(var, "/tmp/from-env.json");
        let from_env = load_network(&path, None).unwrap();
        assert_eq!(from_env.state_file, PathBuf::from("/tmp/from-env.json"));

        let overridden = load_network(&path, Some(PathBuf::from("/tmp/flag.json"))).unwrap();
        assert_eq!(overridden.state_file, PathBuf::from("/tmp/flag.json"));
        env::remove_var(var);
    }

    #[test]
    fn to_raw_round_trips() {
        let net = Network {
            curve: Curve::Secp256k1,
            state_file: PathBuf::from("/abs/chain.json"),
            entry_point: Address::repeat_byte(1),
            factory: Address::repeat_byte(2),
            prover_key: H256::repeat_byte(3),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n.json");
        write_network(&path, &net.to_raw()).unwrap();
        assert_eq!(load_network(&path, None).unwrap(), net);
    }

    #[test]
    fn bad_curve_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        let mut r = raw();
        r.curve = "ed25519".into();
        write_network(&path, &r).unwrap();
        assert!(load_network(&path, None).is_err());
    }
}
