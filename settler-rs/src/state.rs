use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// A staged update no longer matches the value it expected; the batch
    /// can never fold as is.
    StaleBatch,
    /// The chain refused the attestation.
    ProofRejected,
    /// Anything else the contract reported.
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub consecutive_failures: u32,
    pub next_retry_at: u64,
    #[serde(default)]
    pub last_failure_kind: FailureKind,
    #[serde(default)]
    pub last_failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlerState {
    /// Chain height at the last scan. Nothing is rescanned until it moves or a
    /// retry comes due.
    pub last_scanned_height: u64,

    /// Contracts seen with off-chain state, as `0x` hex addresses.
    pub scopes: Vec<String>,

    /// Accepted settlements since this state file was created.
    #[serde(default)]
    pub settled_total: u64,

    /// Per-contract retry/backoff state, keyed like `scopes`.
    #[serde(default)]
    pub retries: BTreeMap<String, RetryInfo>,

    /// The last cycle ran out of settlement budget with scopes still pending.
    #[serde(default)]
    pub backlog: bool,
}

impl SettlerState {
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read_to_string(path)
                .map_err(|e| eyre!("failed to read state file {}: {e}", path.display()))?;
            let st: SettlerState = serde_json::from_str(&raw)
                .map_err(|e| eyre!("failed to parse state file {}: {e}", path.display()))?;
            return Ok(st);
        }

        let init = SettlerState::default();
        init.save(path)?;
        Ok(init)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    eyre!("failed to create state directory {}: {e}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| eyre!("failed to serialize settler state: {e}"))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| {
            eyre!(
                "failed to write temp state file {}: {e}",
                tmp_path.display()
            )
        })?;

        // On Windows, rename fails if the destination exists.
        if let Err(err) = fs::rename(&tmp_path, path) {
            if cfg!(windows) {
                let _ = fs::remove_file(path);
                fs::rename(&tmp_path, path)
                    .map_err(|e| eyre!("failed to replace state file {}: {e}", path.display()))?;
            } else {
                return Err(eyre!(
                    "failed to replace state file {}: {err}",
                    path.display()
                ));
            }
        }
        Ok(())
    }

    pub fn note_scope(&mut self, scope: &str) {
        if let Err(at) = self.scopes.binary_search_by(|s| s.as_str().cmp(scope)) {
            self.scopes.insert(at, scope.to_string());
        }
    }

    pub fn should_skip_due_to_backoff(&self, scope: &str, now: u64) -> bool {
        self.retries
            .get(scope)
            .map(|r| now < r.next_retry_at)
            .unwrap_or(false)
    }

    /// Whether any backed-off scope is due for another attempt.
    pub fn has_due_retry(&self, now: u64) -> bool {
        self.retries.values().any(|r| r.next_retry_at <= now)
    }

    pub fn note_success(&mut self, scope: &str) {
        self.retries.remove(scope);
        self.settled_total = self.settled_total.saturating_add(1);
    }

    pub fn note_failure(
        &mut self,
        scope: &str,
        kind: FailureKind,
        next_retry_at: u64,
        reason: Option<String>,
    ) {
        let entry = self.retries.entry(scope.to_string()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.next_retry_at = next_retry_at;
        entry.last_failure_kind = kind;
        entry.last_failure_reason = reason.map(|s| {
            const MAX: usize = 240;
            // Truncate by chars, not bytes.
            let mut out: String = s.chars().take(MAX).collect();
            if out.len() < s.len() {
                out.push_str("...");
            }
            out
        });
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_init_creates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("settler.json");
        let mut st = SettlerState::load_or_init(&path).unwrap();
        assert!(path.exists());

        st.last_scanned_height = 7;
        st.note_scope("0xbb");
        st.note_scope("0xaa");
        st.note_scope("0xbb");
        st.save(&path).unwrap();

        let reloaded = SettlerState::load_or_init(&path).unwrap();
        assert_eq!(reloaded.last_scanned_height, 7);
        assert_eq!(reloaded.scopes, vec!["0xaa".to_string(), "0xbb".to_string()]);
    }

    #[test]
    fn failure_backs_off_until_success() {
        let mut st = SettlerState::default();
        st.note_failure("0xaa", FailureKind::StaleBatch, 100, Some("stale".into()));
        st.note_failure("0xaa", FailureKind::StaleBatch, 200, None);
        assert_eq!(st.retries["0xaa"].consecutive_failures, 2);
        assert!(st.should_skip_due_to_backoff("0xaa", 150));
        assert!(!st.should_skip_due_to_backoff("0xaa", 200));
        assert!(!st.should_skip_due_to_backoff("0xbb", 0));
        assert!(!st.has_due_retry(150));
        assert!(st.has_due_retry(200));

        st.note_success("0xaa");
        assert!(st.retries.is_empty());
        assert_eq!(st.settled_total, 1);
    }

    #[test]
    fn long_reasons_are_truncated() {
        let mut st = SettlerState::default();
        st.note_failure("0xaa", FailureKind::Unknown, 0, Some("é".repeat(500)));
        let reason = st.retries["0xaa"].last_failure_reason.clone().unwrap();
        assert!(reason.ends_with("..."));
        assert_eq!(reason.chars().count(), 243);
    }
}
