//! Command and Process Substitution
//!
//! `$(...)` (with nested parentheses) and flat backtick substitutions
//! splice a command's stdout into the line, trimmed of trailing
//! newlines. `<(cmd)` materializes a command's stdout as a readable temp
//! file path; `>(cmd)` allocates a writable temp path.
//!
//! The substitution policy comes from the expansion context:
//!
//! - sandbox (default): the body may contain no shell metacharacters,
//!   its first token must be allowlisted, and it runs by direct process
//!   spawn with a cached PATH lookup: no host shell involved.
//! - full: the body is handed to the platform shell verbatim.

use std::io::Write;

use tokio::process::Command;

use crate::error::ShellError;
use crate::expansion::{ExpansionContext, SubstitutionMode};
use crate::expansion::cache::resolve_executable;
use crate::parser::lexer::{strip_quotes, tokenize};

/// Characters that must not appear in a sandboxed substitution body.
const SANDBOX_METACHARS: &[char] = &[';', '&', '|', '<', '>', '`', '$', '\\'];

/// Expand all `$(...)` and backtick substitutions in `input`.
pub async fn expand_command_substitutions(
    input: &str,
    ctx: &mut ExpansionContext<'_>,
) -> Result<String, ShellError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_single = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_single {
            out.push(c);
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                if let Some(&n) = chars.get(i + 1) {
                    out.push(n);
                    i += 1;
                }
                i += 1;
            }
            '\'' => {
                in_single = true;
                out.push(c);
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'(') => {
                let close = find_closing_paren(&chars, i + 1)
                    .ok_or_else(|| ShellError::Parse("unterminated command substitution".into()))?;
                let body: String = chars[i + 2..close].iter().collect();
                let output = run_substitution(&body, ctx).await?;
                out.push_str(output.trim_end_matches('\n'));
                i = close + 1;
            }
            '`' => {
                // Backticks do not nest; scan to the closing backtick.
                let mut j = i + 1;
                while j < chars.len() && chars[j] != '`' {
                    if chars[j] == '\\' {
                        j += 1;
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ShellError::Parse("unterminated backtick substitution".into()));
                }
                let body: String = chars[i + 1..j].iter().collect();
                let output = run_substitution(&body, ctx).await?;
                out.push_str(output.trim_end_matches('\n'));
                i = j + 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Expand `<(cmd)` and `>(cmd)` into temp file paths.
pub async fn expand_process_substitutions(
    input: &str,
    ctx: &mut ExpansionContext<'_>,
) -> Result<String, ShellError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_single {
            out.push(c);
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                if let Some(&n) = chars.get(i + 1) {
                    out.push(n);
                    i += 1;
                }
                i += 1;
            }
            '\'' if !in_double => {
                in_single = true;
                out.push(c);
                i += 1;
            }
            '"' => {
                in_double = !in_double;
                out.push(c);
                i += 1;
            }
            '<' | '>' if !in_double && chars.get(i + 1) == Some(&'(') => {
                let close = find_closing_paren(&chars, i + 1)
                    .ok_or_else(|| ShellError::Parse("unterminated process substitution".into()))?;
                let body: String = chars[i + 2..close].iter().collect();
                let path = if c == '<' {
                    let output = run_substitution(&body, ctx).await?;
                    materialize_temp(&output)?
                } else {
                    materialize_temp("")?
                };
                out.push_str(&path);
                i = close + 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Find the `)` matching the `(` at `open`, with nesting.
fn find_closing_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_single = false;
    let mut i = open;
    while i < chars.len() {
        let c = chars[i];
        if in_single {
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\\' => i += 1,
            '\'' => in_single = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Run one substitution body under the active policy and return its
/// stdout.
pub async fn run_substitution(
    body: &str,
    ctx: &mut ExpansionContext<'_>,
) -> Result<String, ShellError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(String::new());
    }

    match ctx.substitution_mode {
        SubstitutionMode::Full => run_via_host_shell(body, ctx).await,
        SubstitutionMode::Sandbox => run_sandboxed(body, ctx).await,
    }
}

async fn run_sandboxed(body: &str, ctx: &mut ExpansionContext<'_>) -> Result<String, ShellError> {
    if let Some(bad) = body.chars().find(|c| SANDBOX_METACHARS.contains(c)) {
        return Err(ShellError::SandboxDenied(format!(
            "metacharacter {:?} in substitution",
            bad
        )));
    }

    let tokens = tokenize(body);
    let words: Vec<String> = tokens.iter().map(|t| strip_quotes(&t.text)).collect();
    let name = match words.first() {
        Some(n) => n.clone(),
        None => return Ok(String::new()),
    };

    if !ctx.sandbox_allow.contains(&name) {
        return Err(ShellError::SandboxDenied(format!("{} is not allowlisted", name)));
    }

    let path_env = ctx
        .env
        .get("PATH")
        .cloned()
        .or_else(|| std::env::var("PATH").ok())
        .unwrap_or_default();
    let program = resolve_executable(&name, &path_env, &ctx.cwd)
        .ok_or_else(|| ShellError::CommandNotFound(name.clone()))?;

    let output = Command::new(program)
        .args(&words[1..])
        .envs(well_formed_env(ctx))
        .current_dir(&ctx.cwd)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| ShellError::Spawn(format!("{}: {}", name, e)))?;

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_via_host_shell(body: &str, ctx: &mut ExpansionContext<'_>) -> Result<String, ShellError> {
    #[cfg(unix)]
    let (shell, flag) = ("/bin/sh", "-c");
    #[cfg(not(unix))]
    let (shell, flag) = ("cmd", "/c");

    let output = Command::new(shell)
        .arg(flag)
        .arg(body)
        .envs(well_formed_env(ctx))
        .current_dir(&ctx.cwd)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| ShellError::Spawn(format!("{}: {}", shell, e)))?;

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Special parameters (`?`, `$`, `!`, positionals) are shell-internal
/// and never exported to substitution processes.
fn well_formed_env<'a>(
    ctx: &'a ExpansionContext<'_>,
) -> impl Iterator<Item = (&'a String, &'a String)> {
    ctx.env.iter().filter(|(name, _)| {
        name.chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
    })
}

/// Write `content` to a kept temp file and return its path.
fn materialize_temp(content: &str) -> Result<String, ShellError> {
    let mut file = tempfile::NamedTempFile::new()
        .map_err(|e| ShellError::Spawn(format!("temp file: {}", e)))?;
    file.write_all(content.as_bytes())
        .map_err(|e| ShellError::Spawn(format!("temp file: {}", e)))?;
    let (_, path) = file
        .keep()
        .map_err(|e| ShellError::Spawn(format!("temp file: {}", e)))?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn ctx(env: &mut HashMap<String, String>, mode: SubstitutionMode) -> ExpansionContext<'_> {
        ExpansionContext {
            cwd: "/".into(),
            env,
            nounset: false,
            last_exit_code: 0,
            substitution_mode: mode,
            sandbox_allow: HashSet::from(["echo".to_string(), "printf".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_sandbox_echo() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let out = expand_command_substitutions("before $(echo hi) after", &mut c)
            .await
            .unwrap();
        assert_eq!(out, "before hi after");
    }

    #[tokio::test]
    async fn test_backtick_form() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let out = expand_command_substitutions("v=`echo x`", &mut c).await.unwrap();
        assert_eq!(out, "v=x");
    }

    #[tokio::test]
    async fn test_sandbox_denies_metacharacters() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let err = expand_command_substitutions("$(echo hi; echo there)", &mut c)
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::SandboxDenied(_)));
    }

    #[tokio::test]
    async fn test_sandbox_denies_unlisted_command() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let err = expand_command_substitutions("$(rm -rf tmp)", &mut c).await.unwrap_err();
        assert!(matches!(err, ShellError::SandboxDenied(_)));
    }

    #[tokio::test]
    async fn test_full_mode_uses_host_shell() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Full);
        let out = expand_command_substitutions("$(echo a; echo b)", &mut c).await.unwrap();
        assert_eq!(out, "a\nb");
    }

    #[tokio::test]
    async fn test_single_quotes_protect() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let out = expand_command_substitutions("'$(echo hi)'", &mut c).await.unwrap();
        assert_eq!(out, "'$(echo hi)'");
    }

    #[tokio::test]
    async fn test_nested_parens_survive_scan() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let out = expand_command_substitutions("$(echo (a))", &mut c).await.unwrap();
        assert_eq!(out, "(a)");
    }

    #[tokio::test]
    async fn test_unterminated_substitution_is_parse_error() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let err = expand_command_substitutions("$(echo hi", &mut c).await.unwrap_err();
        assert!(matches!(err, ShellError::Parse(_)));
    }

    #[tokio::test]
    async fn test_process_substitution_in() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let out = expand_process_substitutions("diff <(echo a) x", &mut c).await.unwrap();
        assert!(out.starts_with("diff "));
        let path = out.split_whitespace().nth(1).unwrap().to_string();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "a\n");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_process_substitution_out_allocates_path() {
        let mut env = HashMap::new();
        let mut c = ctx(&mut env, SubstitutionMode::Sandbox);
        let out = expand_process_substitutions("tee >(cat)", &mut c).await.unwrap();
        let path = out.split_whitespace().nth(1).unwrap().to_string();
        assert!(std::path::Path::new(&path).exists());
        let _ = std::fs::remove_file(&path);
    }
}
