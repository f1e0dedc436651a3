//! Command Parsing
//!
//! Turns one input line into a chain of commands. Per segment: strip the
//! background marker, apply single-pass alias expansion, pull out
//! redirections, run the expansion engine over the cleaned text and
//! every redirection target, tokenize, and split into name + args.

use crate::error::ShellError;
use crate::expansion::expand;
use crate::expansion::cache::cached_tokenize;
use crate::parser::lexer::strip_quotes;
use crate::parser::operators::{
    split_by_operators_detailed, strip_background_marker, ChainOp,
};
use crate::parser::redirection::{
    extract_redirections, flatten_redirections, Redirection,
};
use crate::shell::Shell;

/// One fully parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    /// Arguments after the name, quote-stripped.
    pub args: Vec<String>,
    /// Every word including the name, before quote stripping. Alias
    /// lookup and display want this form.
    pub original_args: Vec<String>,
    /// The source slice this command came from.
    pub raw: String,
    pub background: bool,
    pub redirections: Vec<Redirection>,
}

/// An ordered chain of commands. `ops[i]` joins `commands[i]` to
/// `commands[i + 1]`; consecutive `Pipe` entries form a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChain {
    pub commands: Vec<Command>,
    pub ops: Vec<ChainOp>,
    /// Flattened redirection summary over the whole chain (last one per
    /// descriptor wins). The per-command lists are authoritative.
    pub redirects: Vec<Redirection>,
}

impl CommandChain {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Parse a command line into a [`CommandChain`].
///
/// Async because expansion may spawn substitution processes.
pub async fn parse(input: &str, shell: &mut Shell) -> Result<CommandChain, ShellError> {
    let segments = split_by_operators_detailed(input);
    let mut commands = Vec::new();
    let mut ops = Vec::new();

    for piece in &segments {
        let (body, background) = strip_background_marker(&piece.segment);
        let raw = piece.segment.clone();

        let body = apply_alias(&body, shell);
        let extracted = extract_redirections(&body);

        let mut ctx = shell.expansion_context();
        let expanded = expand(&extracted.cleaned, &mut ctx).await?;
        let mut redirections = Vec::with_capacity(extracted.redirections.len());
        for redir in &extracted.redirections {
            let target = expand(&redir.target, &mut ctx).await?;
            redirections.push(Redirection {
                fd: redir.fd,
                kind: redir.kind,
                target: strip_quotes(&target),
            });
        }

        let tokens = cached_tokenize(&expanded);
        let original_args: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();
        let mut words: Vec<String> = tokens.iter().map(|t| strip_quotes(&t.text)).collect();

        if words.is_empty() && redirections.is_empty() {
            // Expansion reduced the segment to nothing.
            continue;
        }

        let name = if words.is_empty() { String::new() } else { words.remove(0) };
        commands.push(Command {
            name,
            args: words,
            original_args,
            raw,
            background,
            redirections,
        });
        if let Some(op) = piece.op {
            ops.push(op);
        }
    }

    // A trailing operator with no following command is dropped.
    while ops.len() >= commands.len() && !ops.is_empty() {
        ops.pop();
    }

    let redirects = flatten_redirections(
        &commands
            .iter()
            .flat_map(|c| c.redirections.iter().cloned())
            .collect::<Vec<_>>(),
    );

    Ok(CommandChain { commands, ops, redirects })
}

/// Single-pass alias expansion on the first word of a segment.
///
/// A quoted first word suppresses lookup, and the replacement text is
/// not re-examined for further aliases; chained aliases resolve on
/// later parser passes.
fn apply_alias(segment: &str, shell: &Shell) -> String {
    let trimmed = segment.trim_start();
    let tokens = crate::parser::lexer::tokenize(trimmed);
    let first = match tokens.first() {
        Some(t) if !t.quoted => t,
        _ => return segment.to_string(),
    };
    match shell.aliases.get(&first.text) {
        Some(replacement) => {
            let rest = &trimmed[first.text.len()..];
            format!("{}{}", replacement, rest)
        }
        None => segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn parse_line(line: &str) -> CommandChain {
        let mut shell = Shell::new(Config::for_tests());
        parse(line, &mut shell).await.unwrap()
    }

    #[tokio::test]
    async fn test_simple_command() {
        let chain = parse_line("echo hello world").await;
        assert_eq!(chain.commands.len(), 1);
        let cmd = &chain.commands[0];
        assert_eq!(cmd.name, "echo");
        assert_eq!(cmd.args, vec!["hello", "world"]);
        assert!(!cmd.background);
    }

    #[tokio::test]
    async fn test_chain_ops() {
        let chain = parse_line("a && b || c; d").await;
        assert_eq!(chain.commands.len(), 4);
        assert_eq!(chain.ops, vec![ChainOp::And, ChainOp::Or, ChainOp::Seq]);
    }

    #[tokio::test]
    async fn test_pipeline_ops() {
        let chain = parse_line("cat f | wc -l").await;
        assert_eq!(chain.ops, vec![ChainOp::Pipe]);
    }

    #[tokio::test]
    async fn test_quote_stripping() {
        let chain = parse_line(r#"echo "hello world" 'single'"#).await;
        let cmd = &chain.commands[0];
        assert_eq!(cmd.args, vec!["hello world", "single"]);
        assert_eq!(cmd.original_args[1], "\"hello world\"");
    }

    #[tokio::test]
    async fn test_expansion_in_parse() {
        let mut shell = Shell::new(Config::for_tests());
        shell.env.insert("TARGET".to_string(), "moon".to_string());
        let chain = parse("echo $TARGET", &mut shell).await.unwrap();
        assert_eq!(chain.commands[0].args, vec!["moon"]);
    }

    #[tokio::test]
    async fn test_brace_expansion_makes_multiple_args() {
        let chain = parse_line("touch file.{txt,log}").await;
        assert_eq!(chain.commands[0].args, vec!["file.txt", "file.log"]);
    }

    #[tokio::test]
    async fn test_background_flag() {
        let chain = parse_line("sleep 10 &").await;
        assert!(chain.commands[0].background);
        assert_eq!(chain.commands[0].name, "sleep");
    }

    #[tokio::test]
    async fn test_redirections_extracted_and_expanded() {
        let mut shell = Shell::new(Config::for_tests());
        shell.env.insert("OUT".to_string(), "result.txt".to_string());
        let chain = parse("echo hi > $OUT", &mut shell).await.unwrap();
        let cmd = &chain.commands[0];
        assert_eq!(cmd.args, vec!["hi"]);
        assert_eq!(cmd.redirections[0].target, "result.txt");
        assert_eq!(chain.redirects.len(), 1);
    }

    #[tokio::test]
    async fn test_alias_single_pass() {
        let mut shell = Shell::new(Config::for_tests());
        shell.aliases.insert("ll".to_string(), "ls -l".to_string());
        let chain = parse("ll /tmp", &mut shell).await.unwrap();
        let cmd = &chain.commands[0];
        assert_eq!(cmd.name, "ls");
        assert_eq!(cmd.args, vec!["-l", "/tmp"]);
    }

    #[tokio::test]
    async fn test_alias_not_recursive() {
        let mut shell = Shell::new(Config::for_tests());
        shell.aliases.insert("a".to_string(), "a -x".to_string());
        let chain = parse("a", &mut shell).await.unwrap();
        assert_eq!(chain.commands[0].name, "a");
        assert_eq!(chain.commands[0].args, vec!["-x"]);
    }

    #[tokio::test]
    async fn test_quoted_first_word_suppresses_alias() {
        let mut shell = Shell::new(Config::for_tests());
        shell.aliases.insert("ll".to_string(), "ls -l".to_string());
        let chain = parse("'ll'", &mut shell).await.unwrap();
        assert_eq!(chain.commands[0].name, "ll");
    }

    #[tokio::test]
    async fn test_raw_preserves_source() {
        let chain = parse_line("echo   spaced   args").await;
        assert_eq!(chain.commands[0].raw, "echo   spaced   args");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let chain = parse_line("   ").await;
        assert!(chain.is_empty());
    }
}
