//! Redirection Parsing
//!
//! Extracts redirection operators and their targets from a command
//! segment, leaving the cleaned command text behind. Operators are
//! matched longest-first so `&>>` is never misread as `&>` plus `>`,
//! and `2>>` never as `2` plus `>>`.

/// What a redirection does with its file descriptor(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirKind {
    /// `< file`: stdin from file.
    In,
    /// `> file`: stdout to file, truncating.
    Out,
    /// `>> file`: stdout to file, appending.
    Append,
    /// `2> file`: stderr to file, truncating.
    Err,
    /// `2>> file`: stderr to file, appending.
    ErrAppend,
    /// `&> file`: stdout and stderr to file, truncating.
    Both,
    /// `&>> file`: stdout and stderr to file, appending.
    BothAppend,
}

/// One parsed redirection, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// The descriptor the redirection applies to (1 for `Both*`).
    pub fd: u32,
    pub kind: RedirKind,
    /// Raw target word; expansion and quote stripping happen later.
    pub target: String,
}

/// Result of scanning a segment for redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRedirections {
    /// The segment with redirections removed.
    pub cleaned: String,
    /// All redirections in source order. Later entries for the same fd
    /// override earlier ones at execution time, but the full list is
    /// preserved for the executor.
    pub redirections: Vec<Redirection>,
}

/// Scan a segment and pull out its redirections.
///
/// Quotes and escapes are respected: operators inside quotes are data.
/// A `<<` here-doc operator stops the scan for the rest of the segment
/// (conservative contract), and `<(`/`>(` process substitutions are
/// left untouched for the expansion engine.
pub fn extract_redirections(segment: &str) -> ExtractedRedirections {
    let chars: Vec<char> = segment.chars().collect();
    let mut cleaned = String::with_capacity(segment.len());
    let mut redirections = Vec::new();

    let mut in_single = false;
    let mut in_double = false;
    let mut paren_depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if in_single {
            cleaned.push(c);
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            cleaned.push(c);
            match c {
                '"' => in_double = false,
                '\\' => {
                    if let Some(n) = next {
                        cleaned.push(n);
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
            continue;
        }
        // Inside `$(...)` / `<(...)` the operators belong to the inner
        // command, not to this segment.
        if paren_depth > 0 {
            match c {
                '(' => paren_depth += 1,
                ')' => paren_depth -= 1,
                _ => {}
            }
            cleaned.push(c);
            i += 1;
            continue;
        }

        match c {
            '(' => {
                paren_depth += 1;
                cleaned.push(c);
                i += 1;
            }
            '\\' => {
                cleaned.push(c);
                if let Some(n) = next {
                    cleaned.push(n);
                    i += 1;
                }
                i += 1;
            }
            '\'' => {
                in_single = true;
                cleaned.push(c);
                i += 1;
            }
            '"' => {
                in_double = true;
                cleaned.push(c);
                i += 1;
            }
            '<' if next == Some('<') => {
                // Here-doc: leave the rest of the segment as-is.
                cleaned.extend(&chars[i..]);
                break;
            }
            '<' if next == Some('(') => {
                // Process substitution, not a redirection.
                cleaned.push(c);
                i += 1;
            }
            '>' if next == Some('(') => {
                cleaned.push(c);
                i += 1;
            }
            '&' if next == Some('>') => {
                let append = chars.get(i + 2) == Some(&'>');
                let kind = if append { RedirKind::BothAppend } else { RedirKind::Both };
                i += if append { 3 } else { 2 };
                i = consume_target(&chars, i, 1, kind, &mut redirections);
            }
            '>' => {
                let append = next == Some('>');
                let kind = if append { RedirKind::Append } else { RedirKind::Out };
                i += if append { 2 } else { 1 };
                i = consume_target(&chars, i, 1, kind, &mut redirections);
            }
            '<' => {
                i += 1;
                i = consume_target(&chars, i, 0, RedirKind::In, &mut redirections);
            }
            c if c.is_ascii_digit() && is_fd_position(&chars, i) && is_redir_after_digits(&chars, i) => {
                // Numeric descriptor: N> / N>> / N<
                let mut j = i;
                let mut fd = 0u32;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    fd = fd.saturating_mul(10).saturating_add(chars[j] as u32 - '0' as u32);
                    j += 1;
                }
                let (kind, oplen) = match (chars.get(j), chars.get(j + 1)) {
                    (Some('>'), Some('>')) => (append_kind_for(fd), 2),
                    (Some('>'), _) => (kind_for(fd), 1),
                    (Some('<'), _) => (RedirKind::In, 1),
                    _ => unreachable!("guarded by is_redir_after_digits"),
                };
                i = consume_target(&chars, j + oplen, fd, kind, &mut redirections);
            }
            _ => {
                cleaned.push(c);
                i += 1;
            }
        }
    }

    ExtractedRedirections {
        cleaned: cleaned.trim().to_string(),
        redirections,
    }
}

fn kind_for(fd: u32) -> RedirKind {
    match fd {
        2 => RedirKind::Err,
        _ => RedirKind::Out,
    }
}

fn append_kind_for(fd: u32) -> RedirKind {
    match fd {
        2 => RedirKind::ErrAppend,
        _ => RedirKind::Append,
    }
}

/// A digit run is a descriptor only when it stands alone before the
/// operator (start of segment or after whitespace), so `file2>out`
/// keeps its name intact.
fn is_fd_position(chars: &[char], i: usize) -> bool {
    i == 0 || chars[i - 1].is_whitespace()
}

fn is_redir_after_digits(chars: &[char], i: usize) -> bool {
    let mut j = i;
    while j < chars.len() && chars[j].is_ascii_digit() {
        j += 1;
    }
    match chars.get(j) {
        Some('>') => chars.get(j + 1) != Some(&'(') ,
        Some('<') => chars.get(j + 1) != Some(&'(') && chars.get(j + 1) != Some(&'<'),
        _ => false,
    }
}

/// Read the whitespace-delimited target after an operator and record the
/// redirection. Returns the scan position after the target.
fn consume_target(
    chars: &[char],
    mut i: usize,
    fd: u32,
    kind: RedirKind,
    redirections: &mut Vec<Redirection>,
) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    let mut target = String::new();
    let mut in_single = false;
    let mut in_double = false;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if !in_single => {
                target.push(c);
                if let Some(&n) = chars.get(i + 1) {
                    target.push(n);
                    i += 1;
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                target.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                target.push(c);
            }
            c if c.is_whitespace() && !in_single && !in_double => break,
            _ => target.push(c),
        }
        i += 1;
    }
    if !target.is_empty() {
        redirections.push(Redirection { fd, kind, target });
    }
    i
}

/// Flatten a redirection list: keep only the last entry per descriptor.
/// `Both*` entries claim stdout and stderr at once.
pub fn flatten_redirections(redirections: &[Redirection]) -> Vec<Redirection> {
    let mut out: Vec<Redirection> = Vec::new();
    for redir in redirections {
        let claims: &[u32] = match redir.kind {
            RedirKind::Both | RedirKind::BothAppend => &[1, 2],
            _ => std::slice::from_ref(&redir.fd),
        };
        out.retain(|existing| {
            let existing_claims: &[u32] = match existing.kind {
                RedirKind::Both | RedirKind::BothAppend => &[1, 2],
                _ => std::slice::from_ref(&existing.fd),
            };
            !existing_claims.iter().any(|fd| claims.contains(fd))
        });
        out.push(redir.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_redirect() {
        let r = extract_redirections("echo hi > out.txt");
        assert_eq!(r.cleaned, "echo hi");
        assert_eq!(
            r.redirections,
            vec![Redirection { fd: 1, kind: RedirKind::Out, target: "out.txt".into() }]
        );
    }

    #[test]
    fn test_append_and_stderr() {
        let r = extract_redirections("cmd >> log 2> err");
        assert_eq!(r.cleaned, "cmd");
        assert_eq!(r.redirections.len(), 2);
        assert_eq!(r.redirections[0].kind, RedirKind::Append);
        assert_eq!(r.redirections[1].kind, RedirKind::Err);
        assert_eq!(r.redirections[1].fd, 2);
    }

    #[test]
    fn test_both_forms() {
        let r = extract_redirections("cmd &> all.log");
        assert_eq!(r.redirections[0].kind, RedirKind::Both);
        let r = extract_redirections("cmd &>> all.log");
        assert_eq!(r.redirections[0].kind, RedirKind::BothAppend);
    }

    #[test]
    fn test_stdin_redirect() {
        let r = extract_redirections("wc -l < input");
        assert_eq!(r.cleaned, "wc -l");
        assert_eq!(
            r.redirections,
            vec![Redirection { fd: 0, kind: RedirKind::In, target: "input".into() }]
        );
    }

    #[test]
    fn test_err_append() {
        let r = extract_redirections("cmd 2>> err.log");
        assert_eq!(r.redirections[0].kind, RedirKind::ErrAppend);
    }

    #[test]
    fn test_numeric_fd() {
        let r = extract_redirections("cmd 3> aux");
        assert_eq!(r.redirections[0].fd, 3);
        assert_eq!(r.redirections[0].kind, RedirKind::Out);
    }

    #[test]
    fn test_word_ending_in_digit_is_not_fd() {
        let r = extract_redirections("echo file2> out");
        assert_eq!(r.cleaned, "echo file2");
        assert_eq!(r.redirections[0].fd, 1);
    }

    #[test]
    fn test_quoted_operators_are_data() {
        let r = extract_redirections("echo 'a > b'");
        assert_eq!(r.cleaned, "echo 'a > b'");
        assert!(r.redirections.is_empty());
    }

    #[test]
    fn test_quoted_target() {
        let r = extract_redirections("echo hi > \"my file\"");
        assert_eq!(r.redirections[0].target, "\"my file\"");
    }

    #[test]
    fn test_heredoc_left_alone() {
        let r = extract_redirections("cat <<EOF > not-extracted");
        assert_eq!(r.cleaned, "cat <<EOF > not-extracted");
        assert!(r.redirections.is_empty());
    }

    #[test]
    fn test_process_substitution_left_alone() {
        let r = extract_redirections("diff <(sort a) <(sort b)");
        assert_eq!(r.cleaned, "diff <(sort a) <(sort b)");
        assert!(r.redirections.is_empty());
    }

    #[test]
    fn test_operators_inside_substitution_left_alone() {
        let r = extract_redirections("echo $(cat < inner) > outer");
        assert_eq!(r.cleaned, "echo $(cat < inner)");
        assert_eq!(r.redirections.len(), 1);
        assert_eq!(r.redirections[0].target, "outer");
    }

    #[test]
    fn test_dup_target() {
        let r = extract_redirections("cmd 2>&1");
        assert_eq!(r.redirections[0].fd, 2);
        assert_eq!(r.redirections[0].target, "&1");
    }

    #[test]
    fn test_flatten_keeps_last_per_fd() {
        let r = extract_redirections("cmd > a > b 2> c");
        assert_eq!(r.redirections.len(), 3);
        let flat = flatten_redirections(&r.redirections);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].target, "b");
        assert_eq!(flat[1].target, "c");
    }

    #[test]
    fn test_flatten_both_overrides_out_and_err() {
        let r = extract_redirections("cmd > a 2> b &> c");
        let flat = flatten_redirections(&r.redirections);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].target, "c");
    }
}
