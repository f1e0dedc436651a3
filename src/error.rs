//! Shell Errors
//!
//! Unified error type for parsing, expansion, and command resolution.
//! Exit-code mapping follows the POSIX convention: parse errors are 2,
//! resolution failures are 127, spawn failures are 1.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShellError {
    /// Malformed input line: unterminated construct, unexpected block
    /// terminator, unknown redirection form.
    #[error("parse error: {0}")]
    Parse(String),

    /// Expansion failed: `${VAR:?msg}`, nounset violation, sandbox denial,
    /// arithmetic division by zero.
    #[error("{0}")]
    Expansion(String),

    /// A variable required under `set -u` was unset or empty.
    #[error("{0}: unbound variable")]
    Unbound(String),

    /// Command substitution was rejected by the sandbox policy.
    #[error("command substitution not allowed: {0}")]
    SandboxDenied(String),

    /// The command name resolved to nothing on PATH.
    #[error("{0}: command not found")]
    CommandNotFound(String),

    /// The OS failed to spawn the process.
    #[error("{0}")]
    Spawn(String),
}

impl ShellError {
    /// The exit code a failing command surfaces for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Parse(_) => 2,
            ShellError::CommandNotFound(_) => 127,
            ShellError::Expansion(_)
            | ShellError::Unbound(_)
            | ShellError::SandboxDenied(_)
            | ShellError::Spawn(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShellError::Parse("x".into()).exit_code(), 2);
        assert_eq!(ShellError::CommandNotFound("x".into()).exit_code(), 127);
        assert_eq!(ShellError::Unbound("X".into()).exit_code(), 1);
    }

    #[test]
    fn test_display() {
        let e = ShellError::Unbound("USER".into());
        assert_eq!(e.to_string(), "USER: unbound variable");
        let e = ShellError::CommandNotFound("frob".into());
        assert_eq!(e.to_string(), "frob: command not found");
    }
}
