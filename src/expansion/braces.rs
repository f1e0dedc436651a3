//! Brace Expansion
//!
//! Expands comma lists `{a,b,c}` and ranges `{m..n}` / `{m..n..step}`.
//! Numeric ranges keep zero-padding when either endpoint carries leading
//! zeros; character ranges work over single letters. Step sign is
//! ignored and the natural direction of the endpoints is used. Items are
//! joined with spaces so later tokenization yields one argument each.

/// Upper bound on produced range items, guarding runaway `{1..10000000}`.
const MAX_RANGE_ITEMS: usize = 10_000;

/// Maximum expansion passes over one input (nested braces re-scan).
const MAX_PASSES: usize = 32;

/// Expand every unquoted brace group in `input`.
pub fn expand_braces(input: &str) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_PASSES {
        match expand_first_group(&current) {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

/// Expand the first expandable `{...}` group, or None when none remain.
fn expand_first_group(input: &str) -> Option<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if !in_single => {
                i += 2;
                continue;
            }
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '{' if !in_single && !in_double => {
                if let Some(close) = find_matching_brace(&chars, i) {
                    let inner: String = chars[i + 1..close].iter().collect();
                    if let Some(items) = expand_group_body(&inner) {
                        let word_start = find_word_start(&chars, i);
                        let word_end = find_word_end(&chars, close);
                        let prefix: String = chars[word_start..i].iter().collect();
                        let suffix: String = chars[close + 1..word_end].iter().collect();
                        let expanded = items
                            .iter()
                            .map(|item| format!("{}{}{}", prefix, item, suffix))
                            .collect::<Vec<_>>()
                            .join(" ");
                        let before: String = chars[..word_start].iter().collect();
                        let after: String = chars[word_end..].iter().collect();
                        return Some(format!("{}{}{}", before, expanded, after));
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}

fn find_matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
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

fn find_word_start(chars: &[char], brace: usize) -> usize {
    let mut i = brace;
    while i > 0 && !chars[i - 1].is_whitespace() {
        i -= 1;
    }
    i
}

fn find_word_end(chars: &[char], close: usize) -> usize {
    let mut i = close + 1;
    while i < chars.len() && !chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Produce the items for one group body, or None when the body is not
/// expandable (no top-level comma and no valid range).
fn expand_group_body(body: &str) -> Option<Vec<String>> {
    if let Some(items) = expand_range(body) {
        return Some(items);
    }
    let parts = split_top_level_commas(body);
    if parts.len() < 2 {
        return None;
    }
    // Comma alternatives may themselves contain brace groups; the outer
    // re-scan pass picks them up.
    Some(parts)
}

fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(&n) = chars.peek() {
                    current.push(n);
                    chars.next();
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Expand `m..n` and `m..n..step` range forms.
fn expand_range(body: &str) -> Option<Vec<String>> {
    let pieces: Vec<&str> = body.split("..").collect();
    if pieces.len() != 2 && pieces.len() != 3 {
        return None;
    }
    let step = if pieces.len() == 3 {
        pieces[2].parse::<i64>().ok()?
    } else {
        1
    };

    if let (Ok(start), Ok(end)) = (pieces[0].parse::<i64>(), pieces[1].parse::<i64>()) {
        return Some(numeric_range(start, end, step, pieces[0], pieces[1]));
    }

    let (s, e) = (single_alpha(pieces[0])?, single_alpha(pieces[1])?);
    Some(char_range(s, e, step))
}

fn single_alpha(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = chars.next()?;
    (chars.next().is_none() && c.is_ascii_alphabetic()).then_some(c)
}

fn numeric_range(start: i64, end: i64, raw_step: i64, start_str: &str, end_str: &str) -> Vec<String> {
    // Step 0 behaves as 1; sign is ignored, direction comes from the
    // endpoints.
    let step = if raw_step == 0 { 1 } else { raw_step.abs() };

    // Padding width is the widest endpoint digit run with leading zeros,
    // excluding any minus sign.
    let pad_width = [start_str, end_str]
        .iter()
        .filter_map(|s| {
            let digits = s.trim_start_matches('-');
            (digits.len() > 1 && digits.starts_with('0')).then_some(digits.len())
        })
        .max()
        .unwrap_or(0);

    let format_num = |n: i64| {
        if pad_width > 0 {
            if n < 0 {
                format!("-{:0>width$}", n.abs(), width = pad_width)
            } else {
                format!("{:0>width$}", n, width = pad_width)
            }
        } else {
            n.to_string()
        }
    };

    let mut out = Vec::new();
    let mut i = start;
    if start <= end {
        while i <= end && out.len() < MAX_RANGE_ITEMS {
            out.push(format_num(i));
            i += step;
        }
    } else {
        while i >= end && out.len() < MAX_RANGE_ITEMS {
            out.push(format_num(i));
            i -= step;
        }
    }
    out
}

fn char_range(start: char, end: char, raw_step: i64) -> Vec<String> {
    let step = if raw_step == 0 { 1 } else { raw_step.abs() };
    let (s, e) = (start as i64, end as i64);
    let mut out = Vec::new();
    let mut i = s;
    if s <= e {
        while i <= e && out.len() < MAX_RANGE_ITEMS {
            if let Some(c) = char::from_u32(i as u32) {
                out.push(c.to_string());
            }
            i += step;
        }
    } else {
        while i >= e && out.len() < MAX_RANGE_ITEMS {
            if let Some(c) = char::from_u32(i as u32) {
                out.push(c.to_string());
            }
            i -= step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_list() {
        assert_eq!(expand_braces("{a,b,c}"), "a b c");
    }

    #[test]
    fn test_prefix_suffix() {
        assert_eq!(expand_braces("file.{txt,log}"), "file.txt file.log");
        assert_eq!(expand_braces("x{1,2}y"), "x1y x2y");
    }

    #[test]
    fn test_numeric_range() {
        assert_eq!(expand_braces("{1..5}"), "1 2 3 4 5");
        assert_eq!(expand_braces("{5..1}"), "5 4 3 2 1");
    }

    #[test]
    fn test_negative_range() {
        assert_eq!(expand_braces("{-2..2}"), "-2 -1 0 1 2");
    }

    #[test]
    fn test_range_with_step() {
        assert_eq!(expand_braces("{0..10..2}"), "0 2 4 6 8 10");
        assert_eq!(expand_braces("{10..0..-2}"), "10 8 6 4 2 0");
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(expand_braces("{01..03}"), "01 02 03");
        assert_eq!(expand_braces("{08..10}"), "08 09 10");
    }

    #[test]
    fn test_char_range() {
        assert_eq!(expand_braces("{a..e}"), "a b c d e");
        assert_eq!(expand_braces("{e..a}"), "e d c b a");
    }

    #[test]
    fn test_no_expansion_single_item() {
        assert_eq!(expand_braces("{single}"), "{single}");
        assert_eq!(expand_braces("plain text"), "plain text");
    }

    #[test]
    fn test_quoted_braces_untouched() {
        assert_eq!(expand_braces("'{a,b}'"), "'{a,b}'");
        assert_eq!(expand_braces("\"{a,b}\""), "\"{a,b}\"");
    }

    #[test]
    fn test_nested_groups() {
        assert_eq!(expand_braces("{a,b{1,2}}"), "a b1 b2");
    }

    #[test]
    fn test_multiple_groups() {
        assert_eq!(expand_braces("{a,b}{1,2}"), "a1 a2 b1 b2");
    }

    #[test]
    fn test_range_cap() {
        let out = expand_braces("{1..1000000}");
        assert!(out.split(' ').count() <= MAX_RANGE_ITEMS);
    }
}
