//! Builtins
//!
//! In-process commands. Each builtin is a function over `(shell, args)`
//! returning a [`CommandResult`]; a panic inside a builtin is caught
//! and converted into an exit-1 result rather than taking the shell
//! down.

pub mod alias_cmd;
pub mod echo_cmd;
pub mod envops;
pub mod info;
pub mod jobs_cmd;
pub mod misc;
pub mod nav;

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::exec::CommandResult;
use crate::shell::Shell;

/// Every builtin name, for resolution and completion.
pub const BUILTIN_NAMES: &[&str] = &[
    ".", "alias", "bg", "cd", "clear", "echo", "env", "exit", "export", "false", "fg", "help",
    "history", "jobs", "kill", "pwd", "reload", "set", "source", "time", "true", "type",
    "unalias", "unset", "which",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Dispatch a builtin by name. Returns None for unknown names.
pub async fn run_builtin(shell: &mut Shell, name: &str, args: &[String]) -> Option<CommandResult> {
    let result = match name {
        "cd" => guarded(|| nav::cd(shell, args)),
        "pwd" => guarded(|| nav::pwd(shell, args)),
        "echo" => guarded(|| echo_cmd::echo(args)),
        "true" => CommandResult::ok(),
        "false" => CommandResult::failure_with_code(String::new(), 1),
        "exit" => guarded(|| misc::exit(shell, args)),
        "clear" => guarded(|| info::clear(args)),
        "help" => guarded(|| info::help(args)),
        "type" => guarded(|| info::type_cmd(shell, args)),
        "which" => guarded(|| info::which(shell, args)),
        "history" => guarded(|| info::history(shell, args)),
        "alias" => guarded(|| alias_cmd::alias(shell, args)),
        "unalias" => guarded(|| alias_cmd::unalias(shell, args)),
        "export" => guarded(|| envops::export(shell, args)),
        "unset" => guarded(|| envops::unset(shell, args)),
        "set" => guarded(|| envops::set(shell, args)),
        "jobs" => guarded(|| jobs_cmd::jobs(shell, args)),
        "fg" => guarded(|| jobs_cmd::fg(shell, args)),
        "bg" => guarded(|| jobs_cmd::bg(shell, args)),
        "kill" => guarded(|| jobs_cmd::kill(shell, args)),
        "reload" => guarded(|| misc::reload(shell, args)),
        "env" => envops::env_cmd(shell, args).await,
        "source" | "." => misc::source(shell, args).await,
        "time" => misc::time(shell, args).await,
        _ => return None,
    };
    Some(result)
}

/// Convert a builtin panic into a failed result.
fn guarded(f: impl FnOnce() -> CommandResult) -> CommandResult {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => CommandResult::failure("builtin failed unexpectedly\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_is_builtin() {
        assert!(is_builtin("cd"));
        assert!(is_builtin("echo"));
        assert!(is_builtin("."));
        assert!(!is_builtin("ls"));
    }

    #[tokio::test]
    async fn test_unknown_name_is_none() {
        let mut shell = Shell::new(Config::for_tests());
        assert!(run_builtin(&mut shell, "not-a-builtin", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_true_and_false() {
        let mut shell = Shell::new(Config::for_tests());
        let result = run_builtin(&mut shell, "true", &[]).await.unwrap();
        assert_eq!(result.exit_code, 0);
        let result = run_builtin(&mut shell, "false", &[]).await.unwrap();
        assert_eq!(result.exit_code, 1);
    }
}
