//! Test Expression Evaluation
//!
//! Evaluates the bodies of `[ ... ]` and `[[ ... ]]` conditions.
//!
//! Unary operators: `-z -n` (string emptiness), `-e -f -d` (existence,
//! file, directory), `-r -w -x` (permissions). Binary operators:
//! `= == !=` (strings) and `-eq -ne -lt -le -gt -ge` (integers).
//! A single bare token tests for non-emptiness.

use std::path::{Path, PathBuf};

use crate::parser::lexer::{strip_quotes, tokenize};

/// Evaluate a test expression. `cwd` anchors relative file tests.
pub fn evaluate_test_expression(expr: &str, cwd: &str) -> bool {
    let body = unwrap_brackets(expr.trim());
    let words: Vec<String> = tokenize(body)
        .into_iter()
        .map(|t| strip_quotes(&t.text))
        .collect();

    match words.as_slice() {
        [] => false,
        [single] => !single.is_empty(),
        [op, operand] => unary_test(op, operand, cwd),
        [lhs, op, rhs] => binary_test(lhs, op, rhs),
        _ => false,
    }
}

/// Strip a `[ ... ]` or `[[ ... ]]` wrapper if present.
fn unwrap_brackets(expr: &str) -> &str {
    if let Some(inner) = expr.strip_prefix("[[").and_then(|e| e.strip_suffix("]]")) {
        return inner.trim();
    }
    if let Some(inner) = expr.strip_prefix('[').and_then(|e| e.strip_suffix(']')) {
        return inner.trim();
    }
    expr
}

fn resolve(path: &str, cwd: &str) -> PathBuf {
    if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        Path::new(cwd).join(path)
    }
}

fn unary_test(op: &str, operand: &str, cwd: &str) -> bool {
    match op {
        "-z" => operand.is_empty(),
        "-n" => !operand.is_empty(),
        "-e" => resolve(operand, cwd).exists(),
        "-f" => resolve(operand, cwd).is_file(),
        "-d" => resolve(operand, cwd).is_dir(),
        "-r" => mode_test(&resolve(operand, cwd), 0o444),
        "-w" => mode_test(&resolve(operand, cwd), 0o222),
        "-x" => mode_test(&resolve(operand, cwd), 0o111),
        _ => false,
    }
}

#[cfg(unix)]
fn mode_test(path: &Path, mask: u32) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & mask != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn mode_test(path: &Path, _mask: u32) -> bool {
    path.exists()
}

fn binary_test(lhs: &str, op: &str, rhs: &str) -> bool {
    match op {
        "=" | "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
            let (Ok(a), Ok(b)) = (lhs.parse::<i64>(), rhs.parse::<i64>()) else {
                return false;
            };
            match op {
                "-eq" => a == b,
                "-ne" => a != b,
                "-lt" => a < b,
                "-le" => a <= b,
                "-gt" => a > b,
                _ => a >= b,
            }
        }
        _ => false,
    }
}
