//! Expansion Engine
//!
//! Applies every shell expansion to a string in a fixed order:
//!
//! 1. variable / parameter expansion
//! 2. arithmetic expansion `$(( ... ))`
//! 3. brace expansion
//! 4. command substitution
//! 5. process substitution
//!
//! Earlier stages therefore feed later ones: a variable can produce a
//! brace group, a brace group can produce a substitution argument. The
//! whole pass short-circuits when the input contains none of `$`,
//! backtick, or `{`.

pub mod arithmetic;
pub mod braces;
pub mod cache;
pub mod command_subst;
pub mod variable;

use std::collections::{HashMap, HashSet};

use crate::error::ShellError;

/// Placeholder for `\$` while the stages run, so an escaped dollar can
/// never be picked up as a variable or substitution.
pub(crate) const DOLLAR_SENTINEL: char = '\u{E000}';

/// Command-substitution execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstitutionMode {
    /// Metacharacter-free, allowlisted commands only, direct spawn.
    Sandbox,
    /// Delegate to the platform shell.
    Full,
}

/// Everything the expansion engine needs from the shell.
pub struct ExpansionContext<'a> {
    pub cwd: String,
    pub env: &'a mut HashMap<String, String>,
    /// `set -u`: fail on unset or empty required variables.
    pub nounset: bool,
    pub last_exit_code: i32,
    pub substitution_mode: SubstitutionMode,
    pub sandbox_allow: HashSet<String>,
}

/// Run the full expansion pipeline over `input`.
pub async fn expand(input: &str, ctx: &mut ExpansionContext<'_>) -> Result<String, ShellError> {
    if !input.contains('$') && !input.contains('`') && !input.contains('{') {
        return Ok(input.to_string());
    }

    // `$?` reads the last exit code even before the shell has run a
    // command in this environment.
    let last_exit = ctx.last_exit_code;
    ctx.env
        .entry("?".to_string())
        .or_insert_with(|| last_exit.to_string());

    let step = variable::expand_variables(input, ctx.env, ctx.nounset)?;
    let step = expand_arithmetic(&step, ctx.env)?;
    let step = braces::expand_braces(&step);
    let step = command_subst::expand_command_substitutions(&step, ctx).await?;
    let step = command_subst::expand_process_substitutions(&step, ctx).await?;
    Ok(restore_sentinels(&step))
}

/// Replace every `$(( expr ))` with its evaluated value.
fn expand_arithmetic(
    input: &str,
    env: &mut HashMap<String, String>,
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
            '\'' => {
                in_single = true;
                out.push(c);
                i += 1;
            }
            '\\' => {
                out.push(c);
                if let Some(&n) = chars.get(i + 1) {
                    out.push(n);
                    i += 1;
                }
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'(') && chars.get(i + 2) == Some(&'(') => {
                let mut depth = 2usize;
                let mut j = i + 3;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth > 0 {
                    // Unterminated: leave the text for later stages.
                    out.extend(&chars[i..]);
                    break;
                }
                let expr: String = chars[i + 3..j - 2].iter().collect();
                let value = arithmetic::eval_arithmetic(&expr, env)?;
                out.push_str(&value.to_string());
                i = j;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

fn restore_sentinels(input: &str) -> String {
    input.replace(DOLLAR_SENTINEL, "$")
}
