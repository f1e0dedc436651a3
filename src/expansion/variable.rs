//! Variable and Parameter Expansion
//!
//! Handles `$NAME`, positional and special parameters, and the `${...}`
//! parameter operators:
//!
//! - `${#VAR}`   length in characters
//! - `${VAR:-d}` value if set and non-empty, else the default
//! - `${VAR:+a}` the alternative if set and non-empty, else empty
//! - `${VAR:?m}` value, or fail the expansion with the message
//! - `${VAR=d}`  value, or assign the default and return it
//!
//! Colon-less operator forms test "set" instead of "set and non-empty".
//! Lookups consult the shell environment first, then the process
//! environment. Text inside single quotes is never expanded. `\$` is
//! stashed behind a sentinel so later stages cannot reinterpret it; the
//! orchestrator restores it once all stages have run.

use std::collections::HashMap;

use crate::error::ShellError;
use crate::expansion::DOLLAR_SENTINEL;

/// Expand variables and parameters in `input`.
///
/// `${VAR=default}` is the one mutating form: it writes the default back
/// into `env`. Everything else is a pure function of the input and
/// environment.
pub fn expand_variables(
    input: &str,
    env: &mut HashMap<String, String>,
    nounset: bool,
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
            '\\' if chars.get(i + 1) == Some(&'$') => {
                // Stash the escaped dollar; restored after all stages.
                out.push(DOLLAR_SENTINEL);
                i += 2;
            }
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
            '$' if chars.get(i + 1) == Some(&'{') => {
                match find_closing_brace(&chars, i + 1) {
                    Some(close) => {
                        let expr: String = chars[i + 2..close].iter().collect();
                        out.push_str(&process_parameter(&expr, env, nounset)?);
                        i = close + 1;
                    }
                    None => {
                        out.push(c);
                        i += 1;
                    }
                }
            }
            '$' => {
                let (name, consumed) = read_name(&chars, i + 1);
                if consumed == 0 {
                    out.push(c);
                    i += 1;
                } else {
                    match lookup(&name, env) {
                        Some(value) if !value.is_empty() => out.push_str(&value),
                        other => {
                            if nounset {
                                return Err(ShellError::Unbound(name));
                            }
                            if let Some(value) = other {
                                out.push_str(&value);
                            }
                        }
                    }
                    i += 1 + consumed;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Shell environment first, then the process environment.
fn lookup(name: &str, env: &HashMap<String, String>) -> Option<String> {
    env.get(name).cloned().or_else(|| std::env::var(name).ok())
}

/// Read a bare parameter name after `$`: an identifier run, a single
/// digit positional, or one of the special parameters `? $ ! #`.
fn read_name(chars: &[char], start: usize) -> (String, usize) {
    match chars.get(start) {
        Some(&c) if c.is_ascii_digit() => (c.to_string(), 1),
        Some(&c @ ('?' | '$' | '!' | '#')) => (c.to_string(), 1),
        Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
            let mut end = start + 1;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            (chars[start..end].iter().collect(), end - start)
        }
        _ => (String::new(), 0),
    }
}

/// Find the `}` matching the `{` at `open`, tolerating one level of
/// nesting from defaults like `${A:-${B}}`.
fn find_closing_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' => {
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

/// Evaluate the body of a `${...}` expression.
fn process_parameter(
    expr: &str,
    env: &mut HashMap<String, String>,
    nounset: bool,
) -> Result<String, ShellError> {
    // `${#}` is the positional count, not a length form.
    if expr == "#" {
        return Ok(lookup("#", env).unwrap_or_default());
    }

    // Length form.
    if let Some(name) = expr.strip_prefix('#') {
        if !name.is_empty() && is_parameter_name(name) {
            let len = lookup(name, env).map(|v| v.chars().count()).unwrap_or(0);
            return Ok(len.to_string());
        }
    }

    let (name, rest) = split_name(expr);
    if name.is_empty() {
        // Not a parameter expression; reproduce it literally.
        return Ok(format!("${{{}}}", expr));
    }

    if rest.is_empty() {
        let value = lookup(&name, env);
        if nounset && value.as_deref().map_or(true, str::is_empty) {
            return Err(ShellError::Unbound(name));
        }
        return Ok(value.unwrap_or_default());
    }

    let (colon, op, word) = parse_operator(rest)
        .ok_or_else(|| ShellError::Expansion(format!("{}: bad substitution", expr)))?;

    let value = lookup(&name, env);
    let usable = match (&value, colon) {
        (Some(v), true) => !v.is_empty(),
        (Some(_), false) => true,
        (None, _) => false,
    };

    match op {
        '-' => {
            if usable {
                Ok(value.unwrap_or_default())
            } else {
                expand_variables(word, env, nounset)
            }
        }
        '+' => {
            if usable {
                expand_variables(word, env, nounset)
            } else {
                Ok(String::new())
            }
        }
        '?' => {
            if usable {
                Ok(value.unwrap_or_default())
            } else {
                let message = if word.is_empty() {
                    "parameter null or not set".to_string()
                } else {
                    expand_variables(word, env, nounset)?
                };
                Err(ShellError::Expansion(format!("{}: {}", name, message)))
            }
        }
        '=' => {
            if usable {
                Ok(value.unwrap_or_default())
            } else {
                let default = expand_variables(word, env, nounset)?;
                env.insert(name, default.clone());
                Ok(default)
            }
        }
        _ => Err(ShellError::Expansion(format!("{}: bad substitution", expr))),
    }
}

fn is_parameter_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        Some(c) if c.is_ascii_digit() => text.chars().all(|c| c.is_ascii_digit()),
        Some('?' | '$' | '!' | '#') => text.len() == 1,
        _ => false,
    }
}

/// Split `${NAME<rest>}` into the name and the operator remainder.
fn split_name(expr: &str) -> (String, &str) {
    let chars: Vec<char> = expr.chars().collect();
    match chars.first() {
        Some(&c @ ('?' | '$' | '!')) => (c.to_string(), &expr[c.len_utf8()..]),
        Some(&c) if c.is_ascii_digit() => {
            let end = chars.iter().take_while(|c| c.is_ascii_digit()).count();
            (chars[..end].iter().collect(), &expr[end..])
        }
        Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
            let end = chars
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                .count();
            (chars[..end].iter().collect(), &expr[end..])
        }
        _ => (String::new(), expr),
    }
}

/// Parse the operator part of a `${NAME<op><word>}` expression.
/// Returns (colon variant, operator char, word).
fn parse_operator(rest: &str) -> Option<(bool, char, &str)> {
    let mut chars = rest.chars();
    match chars.next()? {
        ':' => {
            let op = chars.next()?;
            matches!(op, '-' | '+' | '?' | '=').then(|| (true, op, &rest[2..]))
        }
        op @ ('-' | '+' | '?' | '=') => Some((false, op, &rest[1..])),
        _ => None,
    }
}
