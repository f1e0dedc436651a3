//! Configuration
//!
//! Typed, read-mostly settings consumed across the shell. Loaded once
//! at startup from an optional TOML file and re-read only by the
//! `reload` builtin. Every field has a default so a missing or partial
//! file is fine.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::expansion::SubstitutionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prompt shown by the interactive loop.
    pub prompt: String,
    /// Per-invocation timeout for external commands, in milliseconds.
    /// 0 disables the timeout.
    pub command_timeout_ms: u64,
    /// Command-substitution policy: "sandbox" or "full".
    pub substitution_mode: String,
    /// First-token allowlist for sandboxed substitution.
    pub sandbox_allow: Vec<String>,
    /// Entries kept by the in-memory history.
    pub history_limit: usize,
    /// Loop-iteration guard for the script engine.
    pub max_loop_iterations: u64,
    /// Background-monitor poll interval.
    pub monitor_interval_ms: u64,
    /// Test mode: no background monitor, no signal handlers.
    pub test_mode: bool,
    /// Capacities for the three expansion caches.
    pub arg_cache_cap: usize,
    pub executable_cache_cap: usize,
    pub arithmetic_cache_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: "$ ".to_string(),
            command_timeout_ms: 0,
            substitution_mode: "sandbox".to_string(),
            sandbox_allow: vec!["echo".to_string(), "printf".to_string()],
            history_limit: 1000,
            max_loop_iterations: 100_000,
            monitor_interval_ms: 1000,
            test_mode: std::env::var("COQUILLE_TEST").map(|v| v == "1").unwrap_or(false),
            arg_cache_cap: crate::expansion::cache::DEFAULT_ARG_SPLIT_CAP,
            executable_cache_cap: crate::expansion::cache::DEFAULT_EXECUTABLE_CAP,
            arithmetic_cache_cap: crate::expansion::cache::DEFAULT_ARITHMETIC_CAP,
        }
    }
}

impl Config {
    /// Settings for unit tests: monitor off, everything else default.
    pub fn for_tests() -> Self {
        Self { test_mode: true, ..Default::default() }
    }

    /// `~/.config/coquille/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config").join("coquille").join("config.toml"))
    }

    /// Load from a TOML file; missing file means defaults, a malformed
    /// file is reported and replaced with defaults.
    pub fn load(path: Option<&std::path::Path>) -> Self {
        let path = match path.map(PathBuf::from).or_else(Self::default_path) {
            Some(path) => path,
            None => return Self::default(),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("{}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn substitution_mode(&self) -> SubstitutionMode {
        if self.substitution_mode.eq_ignore_ascii_case("full") {
            SubstitutionMode::Full
        } else {
            SubstitutionMode::Sandbox
        }
    }

    pub fn sandbox_allow_set(&self) -> HashSet<String> {
        self.sandbox_allow.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.prompt, "$ ");
        assert_eq!(config.substitution_mode(), SubstitutionMode::Sandbox);
        assert!(config.sandbox_allow_set().contains("echo"));
        assert!(config.sandbox_allow_set().contains("printf"));
        assert_eq!(config.command_timeout_ms, 0);
    }

    #[test]
    fn test_for_tests_disables_monitor() {
        assert!(Config::for_tests().test_mode);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = Config::load(Some(std::path::Path::new("/no/such/config.toml")));
        assert_eq!(config.prompt, "$ ");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "prompt = \"coq> \"\nsubstitution_mode = \"full\"\n").unwrap();
        let config = Config::load(Some(&path));
        assert_eq!(config.prompt, "coq> ");
        assert_eq!(config.substitution_mode(), SubstitutionMode::Full);
        // Unspecified fields keep their defaults.
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn test_load_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "prompt = [not valid").unwrap();
        let config = Config::load(Some(&path));
        assert_eq!(config.prompt, "$ ");
    }
}
