//! Operator Splitting
//!
//! Splits a command line on the chain operators `;`, `&&`, `||` and the
//! pipe `|`, honoring every scope in which those characters are not
//! operators: quotes, backslash escapes, `{...}` groups, parentheses
//! (subshells, `$(...)`, `<(...)`, `>(...)`), here-doc lines, and shell
//! block constructs (`if...fi`, `do...done`, `case...esac`).
//!
//! Mixed `&&`/`||` chains evaluate strictly left to right; the splitter
//! preserves source order and attaches to each segment the operator that
//! separates it from the next one.

/// Operator between two chain segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    /// `;`: unconditional sequencing.
    Seq,
    /// `&&`: run the next segment only on success.
    And,
    /// `||`: run the next segment only on failure.
    Or,
    /// `|`: pipe stdout into the next segment.
    Pipe,
}

impl ChainOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOp::Seq => ";",
            ChainOp::And => "&&",
            ChainOp::Or => "||",
            ChainOp::Pipe => "|",
        }
    }
}

/// A segment plus the operator separating it from the next segment.
/// The last segment carries `op = None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSegment {
    pub segment: String,
    pub op: Option<ChainOp>,
}

/// Block keywords that open and close protected scopes.
fn keyword_delta(word: &str) -> Option<(usize, i32)> {
    // (scope index, delta): 0 = if/fi, 1 = do/done, 2 = case/esac
    match word {
        "if" => Some((0, 1)),
        "fi" => Some((0, -1)),
        "do" => Some((1, 1)),
        "done" => Some((1, -1)),
        "case" => Some((2, 1)),
        "esac" => Some((2, -1)),
        _ => None,
    }
}

/// Split `input` into operator-separated segments, left to right.
///
/// Whitespace is trimmed from each segment and empty segments are
/// dropped. Once `<<` is seen outside quotes, splitting is suppressed
/// for the remainder of the line (conservative here-doc handling).
pub fn split_by_operators_detailed(input: &str) -> Vec<OperatorSegment> {
    let chars: Vec<char> = input.chars().collect();
    let mut segments: Vec<OperatorSegment> = Vec::new();
    let mut current = String::new();

    let mut in_single = false;
    let mut in_double = false;
    let mut brace_depth = 0usize;
    let mut paren_depth = 0usize;
    let mut heredoc = false;
    let mut block_depth = [0i32; 3];

    let mut push_segment = |current: &mut String, op: Option<ChainOp>, out: &mut Vec<OperatorSegment>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            out.push(OperatorSegment { segment: trimmed.to_string(), op });
        } else if let Some(last) = out.last_mut() {
            // `a && ; b` style gaps: keep the stronger earlier operator.
            if last.op.is_none() {
                last.op = op;
            }
        }
        current.clear();
    };

    let mut i = 0;
    let mut prev_word_char = false;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if in_single {
            current.push(c);
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            prev_word_char = false;
            continue;
        }

        match c {
            '\\' => {
                current.push(c);
                if let Some(n) = next {
                    current.push(n);
                    i += 2;
                } else {
                    i += 1;
                }
                prev_word_char = true;
                continue;
            }
            '\'' if !in_double => {
                in_single = true;
                current.push(c);
            }
            '"' => {
                in_double = !in_double;
                current.push(c);
            }
            _ if in_double => current.push(c),
            '{' => {
                brace_depth += 1;
                current.push(c);
            }
            '}' => {
                brace_depth = brace_depth.saturating_sub(1);
                current.push(c);
            }
            '(' => {
                paren_depth += 1;
                current.push(c);
            }
            ')' => {
                paren_depth = paren_depth.saturating_sub(1);
                current.push(c);
            }
            '<' if next == Some('<') => {
                heredoc = true;
                current.push('<');
                current.push('<');
                i += 2;
                prev_word_char = false;
                continue;
            }
            c if c.is_alphabetic() && !prev_word_char => {
                // Word start: check for block keywords. Words inside
                // brace groups, parens, or here-doc tails are data, not
                // block structure.
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                let boundary_after = chars.get(j).map_or(true, |c| !c.is_alphanumeric() && *c != '_');
                if boundary_after && brace_depth == 0 && paren_depth == 0 && !heredoc {
                    if let Some((scope, delta)) = keyword_delta(&word) {
                        block_depth[scope] = (block_depth[scope] + delta).max(0);
                    }
                }
                current.push_str(&word);
                i = j;
                prev_word_char = false;
                continue;
            }
            _ => {
                let protected = brace_depth > 0
                    || paren_depth > 0
                    || heredoc
                    || block_depth.iter().any(|d| *d > 0);

                if !protected {
                    match c {
                        '&' if next == Some('&') => {
                            push_segment(&mut current, Some(ChainOp::And), &mut segments);
                            i += 2;
                            prev_word_char = false;
                            continue;
                        }
                        '|' if next == Some('|') => {
                            push_segment(&mut current, Some(ChainOp::Or), &mut segments);
                            i += 2;
                            prev_word_char = false;
                            continue;
                        }
                        '|' => {
                            push_segment(&mut current, Some(ChainOp::Pipe), &mut segments);
                            i += 1;
                            prev_word_char = false;
                            continue;
                        }
                        ';' => {
                            push_segment(&mut current, Some(ChainOp::Seq), &mut segments);
                            i += 1;
                            prev_word_char = false;
                            continue;
                        }
                        _ => {}
                    }
                }
                current.push(c);
            }
        }

        prev_word_char = c.is_alphanumeric() || c == '_' || c == '$';
        i += 1;
    }

    push_segment(&mut current, None, &mut segments);
    segments
}

/// Rebuild an input line from split segments (for the idempotence check).
pub fn rejoin_segments(segments: &[OperatorSegment]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push_str(&seg.segment);
        if let Some(op) = seg.op {
            out.push(' ');
            out.push_str(op.as_str());
            out.push(' ');
        }
    }
    out
}

/// Detect and strip a trailing unquoted `&` that marks the whole segment
/// as a background job. `&&`, `2>&1`-style targets, and quoted text never
/// match.
pub fn strip_background_marker(segment: &str) -> (String, bool) {
    let trimmed = segment.trim_end();
    if !trimmed.ends_with('&') || trimmed.ends_with("&&") {
        return (segment.trim().to_string(), false);
    }
    let body = &trimmed[..trimmed.len() - 1];
    // `>&` / `<&` endings are duplication targets, not background markers.
    if body.ends_with('>') || body.ends_with('<') {
        return (segment.trim().to_string(), false);
    }
    // The `&` must be outside quotes: count unterminated quotes in the body.
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => {
                chars.next();
            }
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }
    }
    if in_single || in_double {
        return (segment.trim().to_string(), false);
    }
    (body.trim().to_string(), true)
}
