//! Introspection builtins: type, which, help, history, clear

use crate::builtins::{is_builtin, BUILTIN_NAMES};
use crate::exec::CommandResult;
use crate::expansion::cache::resolve_executable;
use crate::shell::Shell;

/// `type name...`: report how each name would resolve, in the same
/// order the executor uses: alias, function, builtin, PATH.
pub fn type_cmd(shell: &Shell, args: &[String]) -> CommandResult {
    if args.is_empty() {
        return CommandResult::failure_with_code("type: usage: type name [name ...]\n", 2);
    }

    let mut out = String::new();
    let mut failures = 0;
    for name in args {
        if let Some(value) = shell.aliases.get(name.as_str()) {
            out.push_str(&format!("{} is aliased to `{}'\n", name, value));
        } else if shell.functions.contains_key(name.as_str()) {
            out.push_str(&format!("{} is a function\n", name));
        } else if is_builtin(name) {
            out.push_str(&format!("{} is a shell builtin\n", name));
        } else if let Some(path) = resolve_on_path(shell, name) {
            out.push_str(&format!("{} is {}\n", name, path));
        } else {
            out.push_str(&format!("type: {}: not found\n", name));
            failures += 1;
        }
    }
    CommandResult::new(out, String::new(), if failures > 0 { 1 } else { 0 })
}

/// `which name...`: PATH resolution only (builtins are reported as
/// such, aliases and functions are not consulted).
pub fn which(shell: &Shell, args: &[String]) -> CommandResult {
    if args.is_empty() {
        return CommandResult::failure_with_code("which: usage: which name [name ...]\n", 2);
    }

    let mut out = String::new();
    let mut failures = 0;
    for name in args {
        if is_builtin(name) {
            out.push_str(&format!("{}: shell built-in command\n", name));
        } else if let Some(path) = resolve_on_path(shell, name) {
            out.push_str(&format!("{}\n", path));
        } else {
            failures += 1;
        }
    }
    CommandResult::new(out, String::new(), if failures > 0 { 1 } else { 0 })
}

fn resolve_on_path(shell: &Shell, name: &str) -> Option<String> {
    let path_env = shell.env.get("PATH").cloned().unwrap_or_default();
    resolve_executable(name, &path_env, &shell.cwd).map(|p| p.display().to_string())
}

/// `help`: list builtins.
pub fn help(_args: &[String]) -> CommandResult {
    let mut out = String::from("shell builtins:\n");
    for chunk in BUILTIN_NAMES.chunks(6) {
        out.push_str("  ");
        out.push_str(&chunk.join("  "));
        out.push('\n');
    }
    CommandResult::new(out, String::new(), 0)
}

/// `history [-c] [-n N]`: list entries, clear, or show the last N.
pub fn history(shell: &Shell, args: &[String]) -> CommandResult {
    let mut last_n: Option<usize> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" => {
                shell.history.clear();
                return CommandResult::ok();
            }
            "-n" => match iter.next().and_then(|n| n.parse::<usize>().ok()) {
                Some(n) => last_n = Some(n),
                None => {
                    return CommandResult::failure_with_code("history: -n requires a count\n", 2)
                }
            },
            other => {
                return CommandResult::failure_with_code(
                    format!("history: unknown option {}\n", other),
                    2,
                )
            }
        }
    }

    let entries = shell.history.all();
    let start = match last_n {
        Some(n) => entries.len().saturating_sub(n),
        None => 0,
    };
    let mut out = String::new();
    for (index, entry) in entries.iter().enumerate().skip(start) {
        out.push_str(&format!("{:5}  {}\n", index + 1, entry));
    }
    CommandResult::new(out, String::new(), 0)
}

/// `clear`: ANSI clear-screen sequence.
pub fn clear(_args: &[String]) -> CommandResult {
    CommandResult::new("\x1b[2J\x1b[H".to_string(), String::new(), 0)
}
