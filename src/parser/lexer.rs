//! Lexer for Command Lines
//!
//! Splits a raw line into word tokens while honoring quotes and escapes.
//! Quote characters and backslashes are preserved verbatim in the token
//! text; quote stripping is a separate post-step so that callers can
//! decide when the raw form is still needed (alias lookup, display).

/// A single word token.
///
/// `quoted` records whether any part of the word was quoted in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub quoted: bool,
}

impl Token {
    pub fn new(text: impl Into<String>, quoted: bool) -> Self {
        Self { text: text.into(), quoted }
    }
}

/// Tokenize a command line into words.
///
/// A single left-to-right scan that emits a token on unquoted whitespace
/// at brace depth zero. Inside `{a,b}` groups whitespace does not split,
/// so brace expansion output stays attached to its prefix/suffix.
/// Mismatched quotes are tolerated: they close at end of input.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_quoted = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut brace_depth = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => {
                // Preserve the escape pair verbatim.
                current.push(c);
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current_quoted = true;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current_quoted = true;
                current.push(c);
            }
            '{' if !in_single && !in_double => {
                brace_depth += 1;
                current.push(c);
            }
            '}' if !in_single && !in_double => {
                brace_depth = brace_depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && !in_single && !in_double && brace_depth == 0 => {
                if !current.is_empty() {
                    tokens.push(Token::new(std::mem::take(&mut current), current_quoted));
                    current_quoted = false;
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(Token::new(current, current_quoted));
    }

    tokens
}

/// Remove quote delimiters and resolve backslash escapes in a word.
///
/// Single quotes protect everything; double quotes protect whitespace but
/// allow escapes; outside quotes a backslash escapes the next character.
/// An unterminated quote is treated as closing at end of input, matching
/// the tokenizer.
pub fn strip_quotes(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = word.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '\\' if !in_single => match chars.next() {
                Some(n) => out.push(n),
                None => out.push('\\'),
            },
            _ => out.push(c),
        }
    }

    out
}

/// Join tokens back into a line with single spaces.
///
/// Together with [`tokenize`] this satisfies the idempotence property:
/// re-tokenizing the joined form yields the same tokens.
pub fn join_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        tokenize(input).into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_simple_words() {
        assert_eq!(texts("echo hello world"), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(texts("  echo\t  hi  "), vec!["echo", "hi"]);
    }

    #[test]
    fn test_double_quotes_preserved() {
        assert_eq!(texts(r#"echo "hello world""#), vec!["echo", "\"hello world\""]);
    }

    #[test]
    fn test_single_quotes_preserved() {
        assert_eq!(texts("echo 'a b' c"), vec!["echo", "'a b'", "c"]);
    }

    #[test]
    fn test_quoted_flag() {
        let tokens = tokenize(r#"plain "quoted""#);
        assert!(!tokens[0].quoted);
        assert!(tokens[1].quoted);
    }

    #[test]
    fn test_escape_preserved() {
        assert_eq!(texts(r"echo a\ b"), vec!["echo", r"a\ b"]);
    }

    #[test]
    fn test_brace_group_not_split() {
        assert_eq!(texts("echo {a, b}"), vec!["echo", "{a, b}"]);
    }

    #[test]
    fn test_mismatched_quote_closes_at_end() {
        assert_eq!(texts("echo \"unterminated here"), vec!["echo", "\"unterminated here"]);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"hello world\""), "hello world");
        assert_eq!(strip_quotes("'$HOME'"), "$HOME");
        assert_eq!(strip_quotes(r"a\ b"), "a b");
        assert_eq!(strip_quotes("plain"), "plain");
        assert_eq!(strip_quotes(r#"mix"ed "'lit'"#), "mixed lit");
    }

    #[test]
    fn test_tokenize_idempotent() {
        for line in [
            "echo hello world",
            r#"echo "a b" 'c d' e\ f"#,
            "ls -la | grep foo",
            "echo {a,b,c} tail",
        ] {
            let once = tokenize(line);
            let twice = tokenize(&join_tokens(&once));
            assert_eq!(once, twice, "idempotence failed for {line:?}");
        }
    }

    #[test]
    fn test_tokenize_idempotent_random_lines() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let atoms = [
            "echo",
            "ls",
            "-la",
            "\"a b\"",
            "'c d'",
            "{1..3}",
            "file.{txt,log}",
            "$HOME",
            "x\\ y",
            "--flag=value",
        ];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let count = rng.gen_range(1..7);
            let line = (0..count)
                .map(|_| atoms[rng.gen_range(0..atoms.len())])
                .collect::<Vec<_>>()
                .join(" ");
            let once = tokenize(&line);
            let twice = tokenize(&join_tokens(&once));
            assert_eq!(once, twice, "idempotence failed for {line:?}");
        }
    }
}
