//! Shell Core
//!
//! `Shell` owns the mutable state of one shell session: environment,
//! working directory, aliases, functions, options, the job manager,
//! the hook bus, configuration, and the history collaborator.
//! `run_line` is the single entry point the REPL and `source` go
//! through: emit hooks, route to the chain executor or the script
//! engine, record history.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::builtins::BUILTIN_NAMES;
use crate::config::Config;
use crate::exec::executor::run_chain;
use crate::exec::script::execute_script;
use crate::exec::CommandResult;
use crate::expansion::{ExpansionContext, SubstitutionMode};
use crate::history::{History, MemoryHistory};
use crate::hooks::{HookBus, COMMAND_AFTER, COMMAND_BEFORE, COMMAND_ERROR};
use crate::jobs::JobManager;
use crate::parser::command::parse;
use crate::parser::script::{is_script_input, Statement};

/// `set` option flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellOptions {
    /// `-e`: abort the enclosing block on the first failure.
    pub errexit: bool,
    /// `-u`: unset variables are expansion errors.
    pub nounset: bool,
    /// `-x`: echo commands before running them.
    pub xtrace: bool,
    /// `-a`: assignments are exported automatically.
    pub allexport: bool,
}

/// Environment variables imported from the parent process at startup.
const IMPORTED_VARS: &[&str] = &[
    "HOME", "PATH", "PWD", "USER", "HOSTNAME", "SHELL", "EDITOR", "TERM", "PATHEXT",
];

pub struct Shell {
    /// The shell environment. Positional and special parameters (`?`,
    /// `$`, `!`, `0`..`n`, `#`) live here as plain entries; only
    /// well-formed names are passed to child processes.
    pub env: HashMap<String, String>,
    pub cwd: String,
    pub previous_dir: String,
    pub aliases: IndexMap<String, String>,
    pub functions: IndexMap<String, Vec<Statement>>,
    /// Names marked for export; mirrored to the process environment.
    pub exported: HashSet<String>,
    pub options: ShellOptions,
    pub last_exit_code: i32,
    /// Set by the `exit` builtin; the REPL stops when it appears.
    pub should_exit: Option<i32>,
    pub jobs: JobManager,
    pub hooks: HookBus,
    pub config: Config,
    pub history: Arc<dyn History>,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        let mut env = HashMap::new();
        for name in IMPORTED_VARS {
            if let Ok(value) = std::env::var(name) {
                env.insert(name.to_string(), value);
            }
        }

        let cwd = std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| env.get("PWD").cloned())
            .unwrap_or_else(|| "/".to_string());
        env.insert("PWD".to_string(), cwd.clone());
        env.insert("?".to_string(), "0".to_string());
        env.insert("$".to_string(), std::process::id().to_string());

        let mut exported = HashSet::new();
        for name in ["HOME", "PATH", "PWD"] {
            exported.insert(name.to_string());
        }

        crate::expansion::cache::set_cache_caps(
            config.arg_cache_cap,
            config.executable_cache_cap,
            config.arithmetic_cache_cap,
        );

        let jobs = JobManager::new(!config.test_mode, config.monitor_interval_ms);

        Self {
            env,
            previous_dir: cwd.clone(),
            cwd,
            aliases: IndexMap::new(),
            functions: IndexMap::new(),
            exported,
            options: ShellOptions::default(),
            last_exit_code: 0,
            should_exit: None,
            jobs,
            hooks: HookBus::new(),
            history: Arc::new(MemoryHistory::new(config.history_limit)),
            config,
        }
    }

    /// Run one line of input (or a whole sourced script).
    pub async fn run_line(&mut self, line: &str) -> CommandResult {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return CommandResult::ok();
        }

        self.hooks
            .emit(COMMAND_BEFORE, &serde_json::json!({ "command": trimmed }));

        let result = if trimmed.contains('\n') || is_script_input(trimmed) {
            execute_script(self, trimmed).await
        } else {
            match parse(trimmed, self).await {
                Ok(chain) => run_chain(self, &chain).await,
                Err(e) => CommandResult::failure_with_code(format!("{}\n", e), e.exit_code()),
            }
        };

        self.set_last_exit(result.exit_code);

        if result.success {
            self.history.push(trimmed).await;
        }
        self.hooks.emit(
            COMMAND_AFTER,
            &serde_json::json!({
                "command": trimmed,
                "exit_code": result.exit_code,
                "duration_ms": result.duration_ms,
            }),
        );
        if !result.success {
            self.hooks.emit(
                COMMAND_ERROR,
                &serde_json::json!({
                    "command": trimmed,
                    "exit_code": result.exit_code,
                }),
            );
        }

        result
    }

    /// Record a command's exit code, keeping `$?` in sync.
    pub fn set_last_exit(&mut self, code: i32) {
        self.last_exit_code = code;
        self.env.insert("?".to_string(), code.to_string());
    }

    /// Write a variable, honoring `set -a`.
    pub fn assign(&mut self, name: &str, value: &str) {
        self.env.insert(name.to_string(), value.to_string());
        if self.options.allexport {
            self.exported.insert(name.to_string());
            std::env::set_var(name, value);
        }
    }

    /// Context handed to the expansion engine.
    pub fn expansion_context(&mut self) -> ExpansionContext<'_> {
        ExpansionContext {
            cwd: self.cwd.clone(),
            nounset: self.options.nounset,
            last_exit_code: self.last_exit_code,
            substitution_mode: self.config.substitution_mode(),
            sandbox_allow: self.config.sandbox_allow_set(),
            env: &mut self.env,
        }
    }

    /// Sandbox mode override used by tests and embedders.
    pub fn set_substitution_mode(&mut self, mode: SubstitutionMode) {
        self.config.substitution_mode = match mode {
            SubstitutionMode::Sandbox => "sandbox".to_string(),
            SubstitutionMode::Full => "full".to_string(),
        };
    }

    /// Environment pairs safe to hand to child processes.
    pub fn exported_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .filter(|(name, _)| is_env_name(name))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Names offered to an external completion provider: builtins,
    /// aliases, functions, and executables on PATH.
    pub fn completion_candidates(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for builtin in BUILTIN_NAMES {
            names.insert(builtin.to_string());
        }
        for alias in self.aliases.keys() {
            names.insert(alias.clone());
        }
        for function in self.functions.keys() {
            names.insert(function.clone());
        }
        if let Some(path) = self.env.get("PATH") {
            for dir in std::env::split_paths(path) {
                let Ok(entries) = std::fs::read_dir(&dir) else { continue };
                for entry in entries.flatten() {
                    if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        names.insert(entry.file_name().to_string_lossy().into_owned());
                    }
                }
            }
        }
        names.into_iter().collect()
    }

    /// Tear down job-control state before the process exits.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
