//! Script Execution
//!
//! Walks the statement tree produced by the script parser. Control flow
//! (`break`, `continue`, `return`) is carried as sentinel fields on the
//! per-invocation context and unwound by the statement loop, never by
//! panicking. Function calls push a fresh context; positional
//! parameters live in the environment for the duration of the call.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::ShellError;
use crate::exec::executor::run_chain;
use crate::exec::test_expr::evaluate_test_expression;
use crate::exec::CommandResult;
use crate::expansion::expand;
use crate::parser::command::parse;
use crate::parser::lexer::{strip_quotes, tokenize};
use crate::parser::script::{parse_script, CaseArm, ScriptBlock, Statement};
use crate::shell::Shell;

/// Per-invocation interpreter state. Function calls nest these like a
/// stack: each call gets a fresh context and the caller's resumes when
/// the call returns.
#[derive(Debug, Default)]
pub struct ScriptContext {
    /// Environment entries shadowed by this invocation (positional
    /// parameters, loop variables), with their prior values.
    pub locals: HashMap<String, Option<String>>,
    /// `set -e` for this block.
    pub exit_on_error: bool,
    /// Set by `return`; unwinds to the enclosing function call.
    pub return_value: Option<i32>,
    /// Set by `break [n]`; counts loop levels left to unwind.
    pub break_level: u32,
    /// Set by `continue [n]`.
    pub continue_level: u32,
}

impl ScriptContext {
    pub fn new(exit_on_error: bool) -> Self {
        Self { exit_on_error, ..Default::default() }
    }

    fn unwinding(&self) -> bool {
        self.return_value.is_some() || self.break_level > 0 || self.continue_level > 0
    }
}

/// Parse and run a script.
pub async fn execute_script(shell: &mut Shell, input: &str) -> CommandResult {
    let statements = match parse_script(input) {
        Ok(statements) => statements,
        Err(e) => return CommandResult::failure_with_code(format!("{}\n", e), e.exit_code()),
    };
    let mut ctx = ScriptContext::new(shell.options.errexit);
    execute_statements(shell, &statements, &mut ctx).await
}

/// Run a statement list, accumulating output. Stops early on control
/// flow sentinels, `exit`, or a failure under `set -e`.
pub fn execute_statements<'a>(
    shell: &'a mut Shell,
    statements: &'a [Statement],
    ctx: &'a mut ScriptContext,
) -> Pin<Box<dyn Future<Output = CommandResult> + Send + 'a>> {
    Box::pin(async move {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut last_exit = 0;

        for statement in statements {
            let result = execute_statement(shell, statement, ctx).await;
            stdout.push_str(&result.stdout);
            stderr.push_str(&result.stderr);
            last_exit = result.exit_code;

            if ctx.unwinding() || shell.should_exit.is_some() {
                break;
            }
            if ctx.exit_on_error && last_exit != 0 {
                break;
            }
        }

        CommandResult::new(stdout, stderr, last_exit)
    })
}

async fn execute_statement(
    shell: &mut Shell,
    statement: &Statement,
    ctx: &mut ScriptContext,
) -> CommandResult {
    match statement {
        Statement::Command { raw } => execute_command_statement(shell, raw, ctx).await,
        Statement::Block { block, .. } => execute_block(shell, block, ctx).await,
    }
}

/// Run one command statement, intercepting the control-flow words.
async fn execute_command_statement(
    shell: &mut Shell,
    raw: &str,
    ctx: &mut ScriptContext,
) -> CommandResult {
    let words: Vec<String> = tokenize(raw.trim())
        .into_iter()
        .map(|t| strip_quotes(&t.text))
        .collect();

    match words.first().map(String::as_str) {
        Some("break") => {
            ctx.break_level = parse_level(words.get(1));
            CommandResult::ok()
        }
        Some("continue") => {
            ctx.continue_level = parse_level(words.get(1));
            CommandResult::ok()
        }
        Some("return") => {
            let code = words
                .get(1)
                .and_then(|w| w.parse::<i32>().ok())
                .unwrap_or(shell.last_exit_code);
            ctx.return_value = Some(code);
            CommandResult::new(String::new(), String::new(), code)
        }
        _ => match parse(raw, shell).await {
            Ok(chain) => run_chain(shell, &chain).await,
            Err(e) => CommandResult::failure_with_code(format!("{}\n", e), e.exit_code()),
        },
    }
}

fn parse_level(word: Option<&String>) -> u32 {
    word.and_then(|w| w.parse::<u32>().ok()).filter(|n| *n > 0).unwrap_or(1)
}

async fn execute_block(
    shell: &mut Shell,
    block: &ScriptBlock,
    ctx: &mut ScriptContext,
) -> CommandResult {
    match block {
        ScriptBlock::If { condition, body, else_body } => {
            execute_if(shell, condition, body, else_body.as_deref(), ctx).await
        }
        ScriptBlock::For { var, values, body } => {
            execute_for(shell, var, values, body, ctx).await
        }
        ScriptBlock::While { condition, body } => {
            execute_loop(shell, condition, body, ctx, false).await
        }
        ScriptBlock::Until { condition, body } => {
            execute_loop(shell, condition, body, ctx, true).await
        }
        ScriptBlock::Case { word, arms } => execute_case(shell, word, arms, ctx).await,
        ScriptBlock::Function { name, body } => {
            shell.functions.insert(name.clone(), body.clone());
            CommandResult::ok()
        }
    }
}

/// `if`: exit 0 when the then-branch ran to success, 1 when the else
/// path was taken, so `if ...; fi || fallback` composes.
async fn execute_if(
    shell: &mut Shell,
    condition: &str,
    body: &[Statement],
    else_body: Option<&[Statement]>,
    ctx: &mut ScriptContext,
) -> CommandResult {
    let (truthy, mut result) = evaluate_condition(shell, condition).await;

    if truthy {
        let branch = execute_statements(shell, body, ctx).await;
        result.stdout.push_str(&branch.stdout);
        result.stderr.push_str(&branch.stderr);
        result.exit_code = branch.exit_code;
    } else if let Some(else_body) = else_body {
        let branch = execute_statements(shell, else_body, ctx).await;
        result.stdout.push_str(&branch.stdout);
        result.stderr.push_str(&branch.stderr);
        result.exit_code = 1;
    } else {
        result.exit_code = 1;
    }
    result.success = result.exit_code == 0;
    result
}

async fn execute_for(
    shell: &mut Shell,
    var: &str,
    values: &[String],
    body: &[Statement],
    ctx: &mut ScriptContext,
) -> CommandResult {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut last_exit = 0;

    // Expand the raw value words; one word can expand to several items.
    let mut items = Vec::new();
    for value in values {
        match expand_in_shell(shell, value).await {
            Ok(expanded) => {
                for token in tokenize(&expanded) {
                    items.push(strip_quotes(&token.text));
                }
            }
            Err(e) => return CommandResult::failure(format!("{}\n", e)),
        }
    }

    // The loop variable shadows any prior value for the loop's duration.
    let previous = shell.env.get(var).cloned();
    let max_iterations = shell.config.max_loop_iterations;

    for (iteration, item) in items.into_iter().enumerate() {
        if iteration as u64 >= max_iterations {
            stderr.push_str("loop iteration limit exceeded\n");
            last_exit = 1;
            break;
        }
        shell.env.insert(var.to_string(), item);

        let result = execute_statements(shell, body, ctx).await;
        stdout.push_str(&result.stdout);
        stderr.push_str(&result.stderr);
        last_exit = result.exit_code;

        if ctx.continue_level > 0 {
            ctx.continue_level -= 1;
            if ctx.continue_level > 0 {
                break;
            }
            continue;
        }
        if ctx.break_level > 0 {
            ctx.break_level -= 1;
            break;
        }
        if ctx.return_value.is_some() || shell.should_exit.is_some() {
            break;
        }
        if ctx.exit_on_error && last_exit != 0 {
            break;
        }
    }

    match previous {
        Some(value) => shell.env.insert(var.to_string(), value),
        None => shell.env.remove(var),
    };

    CommandResult::new(stdout, stderr, last_exit)
}

async fn execute_loop(
    shell: &mut Shell,
    condition: &str,
    body: &[Statement],
    ctx: &mut ScriptContext,
    until: bool,
) -> CommandResult {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut last_exit = 0;
    let max_iterations = shell.config.max_loop_iterations;
    let mut iterations = 0u64;

    loop {
        if iterations >= max_iterations {
            stderr.push_str("loop iteration limit exceeded\n");
            last_exit = 1;
            break;
        }
        iterations += 1;

        let (truthy, cond_result) = evaluate_condition(shell, condition).await;
        stdout.push_str(&cond_result.stdout);
        stderr.push_str(&cond_result.stderr);
        let proceed = if until { !truthy } else { truthy };
        if !proceed {
            break;
        }

        let result = execute_statements(shell, body, ctx).await;
        stdout.push_str(&result.stdout);
        stderr.push_str(&result.stderr);
        last_exit = result.exit_code;

        if ctx.continue_level > 0 {
            ctx.continue_level -= 1;
            if ctx.continue_level > 0 {
                break;
            }
            continue;
        }
        if ctx.break_level > 0 {
            ctx.break_level -= 1;
            break;
        }
        if ctx.return_value.is_some() || shell.should_exit.is_some() {
            break;
        }
        if ctx.exit_on_error && last_exit != 0 {
            break;
        }
    }

    CommandResult::new(stdout, stderr, last_exit)
}

async fn execute_case(
    shell: &mut Shell,
    word: &str,
    arms: &[CaseArm],
    ctx: &mut ScriptContext,
) -> CommandResult {
    let value = match expand_in_shell(shell, word).await {
        Ok(expanded) => strip_quotes(expanded.trim()),
        Err(e) => return CommandResult::failure(format!("{}\n", e)),
    };

    for arm in arms {
        let matched = arm
            .pattern
            .split('|')
            .map(str::trim)
            .any(|pattern| case_pattern_matches(&strip_quotes(pattern), &value));
        if matched {
            return execute_statements(shell, &arm.body, ctx).await;
        }
    }
    CommandResult::ok()
}

/// Glob matching for case arms: `*`, `?`, and `[set]`.
pub fn case_pattern_matches(pattern: &str, value: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(inner, '\\' | '^' | '[') {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if closed {
                    class.push(']');
                    regex.push_str(&class);
                } else {
                    // No matching `]`: the bracket is literal.
                    regex.push_str("\\[");
                    for literal in class.chars().skip(1) {
                        push_escaped(&mut regex, literal);
                    }
                }
            }
            other => push_escaped(&mut regex, other),
        }
    }
    regex.push('$');
    regex_lite::Regex::new(&regex)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Escape a literal character for use in a regex.
fn push_escaped(regex: &mut String, c: char) {
    if matches!(c, '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\') {
        regex.push('\\');
    }
    regex.push(c);
}

/// Evaluate a block condition: bracketed tests go to the test
/// evaluator, everything else runs as a command and is truthy on exit
/// code zero.
async fn evaluate_condition(shell: &mut Shell, condition: &str) -> (bool, CommandResult) {
    let trimmed = condition.trim();
    if trimmed.starts_with('[') {
        let expanded = match expand_in_shell(shell, trimmed).await {
            Ok(expanded) => expanded,
            Err(e) => {
                return (false, CommandResult::failure(format!("{}\n", e)));
            }
        };
        let truthy = evaluate_test_expression(&expanded, &shell.cwd);
        return (truthy, CommandResult::new(String::new(), String::new(), i32::from(!truthy)));
    }

    match parse(trimmed, shell).await {
        Ok(chain) => {
            let result = run_chain(shell, &chain).await;
            let truthy = result.exit_code == 0;
            (truthy, result)
        }
        Err(e) => (false, CommandResult::failure_with_code(format!("{}\n", e), e.exit_code())),
    }
}

async fn expand_in_shell(shell: &mut Shell, text: &str) -> Result<String, ShellError> {
    let mut ctx = shell.expansion_context();
    expand(text, &mut ctx).await
}

/// Call a registered function with positional parameters bound.
///
/// `0` is the function name, `1..n` the arguments, `#` the argc; all
/// are restored (or unset) when the call returns.
pub async fn invoke_function(shell: &mut Shell, name: &str, args: &[String]) -> CommandResult {
    let Some(body) = shell.functions.get(name).cloned() else {
        return CommandResult::failure_with_code(format!("{}: command not found\n", name), 127);
    };

    let mut ctx = ScriptContext::new(shell.options.errexit);

    // Bind positionals, remembering what they shadowed.
    let mut bind = |shell: &mut Shell, key: String, value: String, ctx: &mut ScriptContext| {
        ctx.locals.entry(key.clone()).or_insert_with(|| shell.env.get(&key).cloned());
        shell.env.insert(key, value);
    };
    bind(shell, "0".to_string(), name.to_string(), &mut ctx);
    bind(shell, "#".to_string(), args.len().to_string(), &mut ctx);
    for (index, arg) in args.iter().enumerate() {
        bind(shell, (index + 1).to_string(), arg.clone(), &mut ctx);
    }

    let mut result = execute_statements(shell, &body, &mut ctx).await;

    if let Some(code) = ctx.return_value.take() {
        result.exit_code = code;
        result.success = code == 0;
    }

    // Restore every shadowed entry; parameters that had no prior value
    // are unset on return.
    for (key, previous) in ctx.locals.drain() {
        match previous {
            Some(value) => shell.env.insert(key, value),
            None => shell.env.remove(&key),
        };
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn shell() -> Shell {
        Shell::new(Config::for_tests())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_if_then_else() {
        let mut sh = shell();
        let result = execute_script(&mut sh, "if true; then echo yes; fi").await;
        assert_eq!(result.stdout, "yes\n");
        assert_eq!(result.exit_code, 0);

        let result = execute_script(&mut sh, "if false; then echo yes; else echo no; fi").await;
        assert_eq!(result.stdout, "no\n");
        assert_eq!(result.exit_code, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_if_false_without_else_is_nonzero() {
        let mut sh = shell();
        let result = execute_script(&mut sh, "if false; then echo yes; fi").await;
        assert_eq!(result.stdout, "");
        assert_eq!(result.exit_code, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_test_expression_condition() {
        let mut sh = shell();
        sh.env.insert("NAME".to_string(), "abc".to_string());
        let result = execute_script(&mut sh, "if [ $NAME = abc ]; then echo hit; fi").await;
        assert_eq!(result.stdout, "hit\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_for_loop_binds_and_restores() {
        let mut sh = shell();
        sh.env.insert("i".to_string(), "prior".to_string());
        let result = execute_script(&mut sh, "for i in a b c; do echo $i; done").await;
        assert_eq!(result.stdout, "a\nb\nc\n");
        assert_eq!(sh.env.get("i").map(String::as_str), Some("prior"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_for_loop_unsets_fresh_variable() {
        let mut sh = shell();
        execute_script(&mut sh, "for v in 1; do echo $v; done").await;
        assert!(sh.env.get("v").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_for_over_brace_expansion() {
        let mut sh = shell();
        let result = execute_script(&mut sh, "for n in {1..3}; do echo $n; done").await;
        assert_eq!(result.stdout, "1\n2\n3\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_while_loop_with_counter() {
        let mut sh = shell();
        let script = "N=0\nwhile [ $N -lt 3 ]; do echo $N; N=$(($N + 1)); done";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "0\n1\n2\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_until_loop() {
        let mut sh = shell();
        let script = "N=0\nuntil [ $N -ge 2 ]; do echo tick; N=$(($N + 1)); done";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "tick\ntick\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_break_and_continue() {
        let mut sh = shell();
        let script = "for i in 1 2 3 4; do\nif [ $i = 3 ]; then break; fi\necho $i\ndone";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "1\n2\n");

        let script = "for i in 1 2 3; do\nif [ $i = 2 ]; then continue; fi\necho $i\ndone";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "1\n3\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_break_two_levels() {
        let mut sh = shell();
        let script = "for a in 1 2; do\nfor b in x y; do\necho $a$b\nbreak 2\ndone\ndone";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "1x\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_case_matching() {
        let mut sh = shell();
        sh.env.insert("x".to_string(), "beta".to_string());
        let script = "case $x in\nalpha) echo a;;\nb*) echo b;;\n*) echo other;;\nesac";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "b\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_case_first_match_wins() {
        let mut sh = shell();
        sh.env.insert("x".to_string(), "hit".to_string());
        let script = "case $x in\nh??) echo three;;\nhit) echo exact;;\nesac";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "three\n");
    }

    #[test]
    fn test_case_pattern_forms() {
        assert!(case_pattern_matches("*", "anything"));
        assert!(case_pattern_matches("a*", "abc"));
        assert!(!case_pattern_matches("a*", "bac"));
        assert!(case_pattern_matches("a?c", "abc"));
        assert!(case_pattern_matches("[abc]x", "bx"));
        assert!(!case_pattern_matches("[abc]x", "dx"));
        assert!(case_pattern_matches("[!abc]x", "dx"));
        assert!(case_pattern_matches("plain", "plain"));
        assert!(!case_pattern_matches("plain", "plain2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_function_definition_and_call() {
        let mut sh = shell();
        let script = "greet() {\necho hello $1\n}\ngreet world";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "hello world\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_function_positionals_unset_after_return() {
        let mut sh = shell();
        let script = "f() {\necho $# args, first=$1\n}\nf a b";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "2 args, first=a\n");
        assert!(sh.env.get("1").is_none());
        assert!(sh.env.get("#").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_function_return_value() {
        let mut sh = shell();
        let script = "f() {\nreturn 3\necho unreachable\n}\nf";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_errexit_stops_block() {
        let mut sh = shell();
        sh.options.errexit = true;
        let result = execute_script(&mut sh, "echo one\nfalse\necho two").await;
        assert_eq!(result.stdout, "one\n");
        assert_ne!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_stops_script() {
        let mut sh = shell();
        let result = execute_script(&mut sh, "echo first\nexit 7\necho second").await;
        assert_eq!(result.stdout, "first\n");
        assert_eq!(sh.should_exit, Some(7));
        assert_eq!(result.exit_code, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nested_if_in_for() {
        let mut sh = shell();
        let script = "for i in 1 2 3; do\nif [ $i = 2 ]; then echo two; fi\ndone";
        let result = execute_script(&mut sh, script).await;
        assert_eq!(result.stdout, "two\n");
    }
}
