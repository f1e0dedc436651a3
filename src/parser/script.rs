//! Script Parsing
//!
//! Recognizes block constructs (`if`, `for`, `while`, `until`, `case`,
//! function definitions) and builds a statement tree for the script
//! executor. Input is first normalized into units: blank and comment
//! lines are dropped, backslash continuations are joined, and lines are
//! split on `;` outside quotes, parentheses, and single-line function
//! bodies. Inline bodies after `then` / `else` / `do` become their own
//! units so the block parser only ever sees bare keywords.

use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::error::ShellError;

/// A parsed block construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBlock {
    If {
        condition: String,
        body: Vec<Statement>,
        else_body: Option<Vec<Statement>>,
    },
    For {
        var: String,
        /// Raw value words; expanded when the loop runs.
        values: Vec<String>,
        body: Vec<Statement>,
    },
    While {
        condition: String,
        body: Vec<Statement>,
    },
    Until {
        condition: String,
        body: Vec<Statement>,
    },
    Case {
        word: String,
        arms: Vec<CaseArm>,
    },
    Function {
        name: String,
        body: Vec<Statement>,
    },
}

/// One `pattern) body ;;` arm of a case block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseArm {
    pub pattern: String,
    pub body: Vec<Statement>,
}

/// A statement is either a plain command line or a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Command { raw: String },
    Block { block: ScriptBlock, raw: String },
}

lazy_static! {
    /// `name() { ... }` on a single line; kept whole during unit
    /// splitting and unpacked by the function parser.
    static ref INLINE_FUNCTION: Regex =
        Regex::new(r"^(?:function\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*\)\s*\{(.*)\}\s*$").unwrap();
    /// Multi-line function header: `name() {`, `function name {`, ...
    static ref FUNCTION_HEADER: Regex =
        Regex::new(r"^(?:function\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(\s*\))?\s*\{?\s*$").unwrap();
}

const BLOCK_KEYWORDS: &[&str] = &["if", "for", "while", "until", "case", "function"];

/// Does this input need the script engine, or can the plain chain
/// executor handle it?
pub fn is_script_input(input: &str) -> bool {
    for unit in preprocess(input) {
        let first = unit.split_whitespace().next().unwrap_or("");
        if BLOCK_KEYWORDS.contains(&first) {
            return true;
        }
        if INLINE_FUNCTION.is_match(&unit) || unit.contains("() {") || unit.contains("(){") {
            return true;
        }
    }
    false
}

/// Parse a script into its statement tree.
pub fn parse_script(input: &str) -> Result<Vec<Statement>, ShellError> {
    let units = preprocess(input);
    let mut idx = 0;
    let statements = parse_statements(&units, &mut idx, &[])?;
    if idx < units.len() {
        return Err(ShellError::Parse(format!("unexpected `{}`", units[idx])));
    }
    Ok(statements)
}

/// Normalize raw input into parse units.
fn preprocess(input: &str) -> Vec<String> {
    let mut logical_lines: Vec<String> = Vec::new();
    let mut pending = String::new();

    for line in input.lines() {
        let joined = format!("{}{}", pending, line);
        if let Some(without) = joined.strip_suffix('\\') {
            if !without.ends_with('\\') {
                pending = without.to_string();
                continue;
            }
        }
        pending.clear();
        let trimmed = joined.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        logical_lines.push(trimmed.to_string());
    }
    if !pending.trim().is_empty() {
        logical_lines.push(pending.trim().to_string());
    }

    let mut units = Vec::new();
    for line in logical_lines {
        if INLINE_FUNCTION.is_match(&line) {
            units.push(line);
            continue;
        }
        for unit in split_units(&line) {
            push_unit(&mut units, unit);
        }
    }
    units
}

/// Split `then body` / `else body` / `do body` into keyword + body.
fn push_unit(units: &mut Vec<String>, unit: String) {
    for keyword in ["then", "else", "do"] {
        if let Some(rest) = unit.strip_prefix(keyword) {
            if rest.is_empty() {
                units.push(keyword.to_string());
                return;
            }
            if let Some(body) = rest.strip_prefix(char::is_whitespace) {
                units.push(keyword.to_string());
                let body = body.trim();
                if !body.is_empty() {
                    push_unit(units, body.to_string());
                }
                return;
            }
        }
    }
    units.push(unit);
}

/// Split one line on `;` outside quotes and parentheses; `;;` survives
/// as its own unit (case arm terminator).
fn split_units(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut units = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut paren_depth = 0usize;
    let mut i = 0;

    let mut flush = |current: &mut String, units: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            units.push(trimmed.to_string());
        }
        current.clear();
    };

    while i < chars.len() {
        let c = chars[i];
        if in_single {
            current.push(c);
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                if let Some(&n) = chars.get(i + 1) {
                    current.push(n);
                    i += 1;
                }
                i += 1;
            }
            '\'' if !in_double => {
                in_single = true;
                current.push(c);
                i += 1;
            }
            '"' => {
                in_double = !in_double;
                current.push(c);
                i += 1;
            }
            _ if in_double => {
                current.push(c);
                i += 1;
            }
            '(' => {
                paren_depth += 1;
                current.push(c);
                i += 1;
            }
            ')' => {
                paren_depth = paren_depth.saturating_sub(1);
                current.push(c);
                i += 1;
            }
            ';' if paren_depth == 0 => {
                if chars.get(i + 1) == Some(&';') {
                    flush(&mut current, &mut units);
                    units.push(";;".to_string());
                    i += 2;
                } else {
                    flush(&mut current, &mut units);
                    i += 1;
                }
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    flush(&mut current, &mut units);
    units
}

/// Parse statements until one of `terminators` (which is left for the
/// caller to consume) or end of input.
fn parse_statements(
    units: &[String],
    idx: &mut usize,
    terminators: &[&str],
) -> Result<Vec<Statement>, ShellError> {
    let mut statements = Vec::new();

    while *idx < units.len() {
        let unit = &units[*idx];
        let first = unit.split_whitespace().next().unwrap_or("");

        if terminators.contains(&first) {
            return Ok(statements);
        }
        match first {
            "fi" | "done" | "esac" | "}" | "then" | "else" | "elif" | "do" | ";;" => {
                return Err(ShellError::Parse(format!("unexpected `{}`", first)));
            }
            "if" => {
                let condition = unit["if".len()..].trim().to_string();
                let raw = unit.clone();
                *idx += 1;
                let block = parse_if_tail(condition, units, idx)?;
                statements.push(Statement::Block { block, raw });
            }
            "for" => {
                let raw = unit.clone();
                let block = parse_for(unit, units, idx)?;
                statements.push(Statement::Block { block, raw });
            }
            "while" | "until" => {
                let condition = unit[first.len()..].trim().to_string();
                let raw = unit.clone();
                *idx += 1;
                expect_keyword(units, idx, "do")?;
                let body = parse_statements(units, idx, &["done"])?;
                expect_keyword(units, idx, "done")?;
                let block = if first == "while" {
                    ScriptBlock::While { condition, body }
                } else {
                    ScriptBlock::Until { condition, body }
                };
                statements.push(Statement::Block { block, raw });
            }
            "case" => {
                let raw = unit.clone();
                let block = parse_case(units, idx)?;
                statements.push(Statement::Block { block, raw });
            }
            _ => {
                if let Some(stmt) = try_parse_function(units, idx)? {
                    statements.push(stmt);
                } else {
                    statements.push(Statement::Command { raw: unit.clone() });
                    *idx += 1;
                }
            }
        }
    }

    if terminators.is_empty() {
        Ok(statements)
    } else {
        Err(ShellError::Parse(format!(
            "missing `{}`",
            terminators.first().unwrap_or(&"terminator")
        )))
    }
}

fn expect_keyword(units: &[String], idx: &mut usize, keyword: &str) -> Result<(), ShellError> {
    match units.get(*idx) {
        Some(unit) if unit == keyword => {
            *idx += 1;
            Ok(())
        }
        Some(unit) => Err(ShellError::Parse(format!("expected `{}`, found `{}`", keyword, unit))),
        None => Err(ShellError::Parse(format!("expected `{}`", keyword))),
    }
}

/// Parse the remainder of an `if` after its condition. `elif` desugars
/// into a nested `if` in the else branch; the shared `fi` closes every
/// level at once.
fn parse_if_tail(
    condition: String,
    units: &[String],
    idx: &mut usize,
) -> Result<ScriptBlock, ShellError> {
    expect_keyword(units, idx, "then")?;
    let body = parse_statements(units, idx, &["fi", "else", "elif"])?;

    let else_body = match units.get(*idx).map(String::as_str) {
        Some("fi") => {
            *idx += 1;
            None
        }
        Some("else") => {
            *idx += 1;
            let body = parse_statements(units, idx, &["fi"])?;
            expect_keyword(units, idx, "fi")?;
            Some(body)
        }
        Some(unit) if unit.starts_with("elif") => {
            let nested_cond = unit["elif".len()..].trim().to_string();
            let raw = unit.to_string();
            *idx += 1;
            let nested = parse_if_tail(nested_cond, units, idx)?;
            Some(vec![Statement::Block { block: nested, raw }])
        }
        _ => return Err(ShellError::Parse("missing `fi`".into())),
    };

    Ok(ScriptBlock::If { condition, body, else_body })
}

fn parse_for(unit: &str, units: &[String], idx: &mut usize) -> Result<ScriptBlock, ShellError> {
    let rest = unit["for".len()..].trim();
    let mut words = rest.splitn(2, char::is_whitespace);
    let var = words
        .next()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| ShellError::Parse("for: missing variable name".into()))?
        .to_string();
    let tail = words.next().unwrap_or("").trim();
    let values: Vec<String> = match tail.strip_prefix("in") {
        Some(list) if list.is_empty() || list.starts_with(char::is_whitespace) => {
            crate::parser::lexer::tokenize(list.trim())
                .into_iter()
                .map(|t| t.text)
                .collect()
        }
        _ => return Err(ShellError::Parse("for: expected `in`".into())),
    };

    *idx += 1;
    expect_keyword(units, idx, "do")?;
    let body = parse_statements(units, idx, &["done"])?;
    expect_keyword(units, idx, "done")?;
    Ok(ScriptBlock::For { var, values, body })
}

fn parse_case(units: &[String], idx: &mut usize) -> Result<ScriptBlock, ShellError> {
    let header = &units[*idx];
    let rest = header["case".len()..].trim();

    // `case WORD in [first arm...]`
    let (word, inline_rest) = match rest.find(" in") {
        Some(pos) => {
            let word = rest[..pos].trim().to_string();
            let after = rest[pos + 3..].trim().to_string();
            (word, after)
        }
        None => return Err(ShellError::Parse("case: expected `in`".into())),
    };
    if word.is_empty() {
        return Err(ShellError::Parse("case: missing word".into()));
    }
    *idx += 1;

    // Collect arm units until `esac`, honoring the inline remainder.
    let mut arm_units: Vec<String> = Vec::new();
    if !inline_rest.is_empty() {
        arm_units.push(inline_rest);
    }
    let mut closed = false;
    while *idx < units.len() {
        let unit = &units[*idx];
        *idx += 1;
        if unit == "esac" {
            closed = true;
            break;
        }
        arm_units.push(unit.clone());
    }
    if !closed {
        return Err(ShellError::Parse("missing `esac`".into()));
    }

    // Arms: `pattern) body-units... ;;`
    let mut arms = Vec::new();
    let mut i = 0;
    while i < arm_units.len() {
        let unit = &arm_units[i];
        if unit == ";;" {
            i += 1;
            continue;
        }
        let close = find_unquoted(unit, ')')
            .ok_or_else(|| ShellError::Parse(format!("case: malformed arm `{}`", unit)))?;
        let pattern = unit[..close].trim().trim_start_matches('(').trim().to_string();
        let first_body = unit[close + 1..].trim().to_string();

        let mut body_units = Vec::new();
        if !first_body.is_empty() {
            body_units.push(first_body);
        }
        i += 1;
        while i < arm_units.len() && arm_units[i] != ";;" {
            body_units.push(arm_units[i].clone());
            i += 1;
        }

        let mut body_idx = 0;
        let body = parse_statements(&body_units, &mut body_idx, &[])?;
        arms.push(CaseArm { pattern, body });
    }

    Ok(ScriptBlock::Case { word, arms })
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    for (pos, c) in text.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c == needle && !in_single && !in_double => return Some(pos),
            _ => {}
        }
    }
    None
}

/// Try to parse a function definition starting at the current unit.
fn try_parse_function(
    units: &[String],
    idx: &mut usize,
) -> Result<Option<Statement>, ShellError> {
    let unit = &units[*idx];

    // Single-line form: the whole body sits between the braces.
    if let Some(caps) = INLINE_FUNCTION.captures(unit) {
        let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let interior = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let mut body_units = Vec::new();
        for piece in split_units(interior) {
            push_unit(&mut body_units, piece);
        }
        let mut body_idx = 0;
        let body = parse_statements(&body_units, &mut body_idx, &[])?;
        *idx += 1;
        return Ok(Some(Statement::Block {
            block: ScriptBlock::Function { name, body },
            raw: unit.clone(),
        }));
    }

    // Multi-line header. Require an explicit marker (the `function`
    // keyword or a `()` suffix) so plain commands never match.
    let looks_like_function =
        unit.starts_with("function ") || unit.trim_end().trim_end_matches('{').trim_end().ends_with("()");
    if !looks_like_function {
        return Ok(None);
    }
    let caps = match FUNCTION_HEADER.captures(unit) {
        Some(caps) => caps,
        None => return Ok(None),
    };
    let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    let has_open_brace = unit.trim_end().ends_with('{');
    *idx += 1;
    if !has_open_brace {
        expect_keyword(units, idx, "{")?;
    }
    let body = parse_statements(units, idx, &["}"])?;
    expect_keyword(units, idx, "}")?;
    Ok(Some(Statement::Block {
        block: ScriptBlock::Function { name, body },
        raw: unit.clone(),
    }))
}
