//! Chain and Pipeline Execution
//!
//! Walks a parsed [`CommandChain`] left to right, applying `&&` / `||`
//! skip logic, grouping pipe-connected commands into pipelines, and
//! resolving each command name in order: alias (already applied by the
//! parser), function, builtin, PATH. Output of every segment is
//! captured and accumulated.

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use crate::builtins;
use crate::exec::pipeline::{
    apply_result_redirections, read_input_redirection, run_external_pipeline, ExternalStage,
};
use crate::exec::CommandResult;
use crate::expansion::cache::resolve_executable;
use crate::parser::command::{Command, CommandChain};
use crate::parser::operators::ChainOp;
use crate::shell::Shell;

/// Execute a command chain. Boxed so functions and `source` can
/// re-enter the executor recursively.
pub fn run_chain<'a>(
    shell: &'a mut Shell,
    chain: &'a CommandChain,
) -> Pin<Box<dyn Future<Output = CommandResult> + Send + 'a>> {
    Box::pin(async move {
        let started = Instant::now();
        let groups = group_pipelines(chain);

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut last_exit = 0;

        for (index, (stages, _)) in groups.iter().enumerate() {
            if index > 0 {
                match groups[index - 1].1 {
                    Some(ChainOp::And) if last_exit != 0 => continue,
                    Some(ChainOp::Or) if last_exit == 0 => continue,
                    _ => {}
                }
            }

            let result = run_pipeline_group(shell, stages).await;
            stdout.push_str(&result.stdout);
            stderr.push_str(&result.stderr);
            last_exit = result.exit_code;
            shell.set_last_exit(last_exit);

            if shell.should_exit.is_some() {
                break;
            }
        }

        CommandResult::new(stdout, stderr, last_exit)
            .with_duration(started.elapsed().as_millis() as u64)
    })
}

/// Group consecutive pipe-connected commands; the second element is the
/// chain operator following the group.
fn group_pipelines<'c>(chain: &'c CommandChain) -> Vec<(Vec<&'c Command>, Option<ChainOp>)> {
    let mut groups = Vec::new();
    let mut current: Vec<&Command> = Vec::new();

    for (index, command) in chain.commands.iter().enumerate() {
        current.push(command);
        match chain.ops.get(index).copied() {
            Some(ChainOp::Pipe) => continue,
            op => groups.push((std::mem::take(&mut current), op)),
        }
    }
    if !current.is_empty() {
        groups.push((current, None));
    }
    groups
}

/// Run one pipeline (one or more stages).
async fn run_pipeline_group(shell: &mut Shell, stages: &[&Command]) -> CommandResult {
    let background = stages.last().map(|c| c.background).unwrap_or(false);

    let mut trace = String::new();
    if shell.options.xtrace {
        for stage in stages {
            trace.push_str(&format!("+ {}\n", stage.raw.trim()));
        }
    }

    let mut result = if stages.len() == 1 {
        run_single(shell, stages[0], None, background).await
    } else if stages
        .iter()
        .all(|stage| classify(shell, stage) == StageKind::External)
    {
        run_all_external(shell, stages, background).await
    } else {
        run_mixed_pipeline(shell, stages).await
    };

    if !trace.is_empty() {
        result.stderr = format!("{}{}", trace, result.stderr);
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Assignment,
    Function,
    Builtin,
    External,
}

fn classify(shell: &Shell, command: &Command) -> StageKind {
    if is_assignment_word(&command.name) {
        StageKind::Assignment
    } else if shell.functions.contains_key(&command.name) {
        StageKind::Function
    } else if builtins::is_builtin(&command.name) {
        StageKind::Builtin
    } else {
        StageKind::External
    }
}

fn is_assignment_word(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .enumerate()
                    .all(|(i, c)| c == '_' || if i == 0 { c.is_ascii_alphabetic() } else { c.is_ascii_alphanumeric() })
        }
        None => false,
    }
}

/// Pipeline where every stage is an external command: real processes,
/// one process group, OS pipes.
async fn run_all_external(
    shell: &mut Shell,
    stages: &[&Command],
    background: bool,
) -> CommandResult {
    let mut resolved = Vec::with_capacity(stages.len());
    for stage in stages {
        match resolve_stage(shell, stage) {
            Ok(external) => resolved.push(external),
            Err(result) => return result,
        }
    }
    let text = stages
        .iter()
        .map(|s| s.raw.trim())
        .collect::<Vec<_>>()
        .join(" | ");
    run_external_pipeline(shell, &resolved, background, None, &text).await
}

/// Pipeline with in-process stages: stdout of each stage is carried as
/// a string into the next. Stages run in order, not in parallel.
async fn run_mixed_pipeline(shell: &mut Shell, stages: &[&Command]) -> CommandResult {
    let mut carry: Option<String> = None;
    let mut stderr = String::new();
    let mut exit_code = 0;

    for stage in stages {
        let result = run_single(shell, stage, carry.take(), false).await;
        stderr.push_str(&result.stderr);
        carry = Some(result.stdout);
        exit_code = result.exit_code;
        if shell.should_exit.is_some() {
            break;
        }
    }

    CommandResult::new(carry.unwrap_or_default(), stderr, exit_code)
}

/// Run one command: assignment, function, builtin, or external.
async fn run_single(
    shell: &mut Shell,
    command: &Command,
    stdin_data: Option<String>,
    background: bool,
) -> CommandResult {
    if command.name.is_empty() {
        // `> file` with no command still touches its redirections.
        let mut result = CommandResult::ok();
        apply_result_redirections(&mut result, &command.redirections, &shell.cwd);
        return result;
    }

    match classify(shell, command) {
        StageKind::Assignment => run_assignment(shell, command).await,
        StageKind::Function => {
            let mut result =
                crate::exec::script::invoke_function(shell, &command.name, &command.args).await;
            apply_result_redirections(&mut result, &command.redirections, &shell.cwd);
            result
        }
        StageKind::Builtin => {
            let mut result = match builtins::run_builtin(shell, &command.name, &command.args).await
            {
                Some(result) => result,
                None => CommandResult::failure_with_code(
                    format!("{}: command not found\n", command.name),
                    127,
                ),
            };
            apply_result_redirections(&mut result, &command.redirections, &shell.cwd);
            result
        }
        StageKind::External => {
            let external = match resolve_stage(shell, command) {
                Ok(external) => external,
                Err(result) => return result,
            };
            let stdin_data = match stdin_data {
                Some(data) => Some(data),
                None => match read_input_redirection(&command.redirections, &shell.cwd) {
                    Ok(data) => data,
                    Err(e) => return CommandResult::failure(format!("{}\n", e)),
                },
            };
            run_external_pipeline(shell, &[external], background, stdin_data, command.raw.trim())
                .await
        }
    }
}

/// Apply `NAME=value` words. Leading assignments before a command word
/// bind only for that command's environment; a segment that is nothing
/// but assignments writes the shell environment.
async fn run_assignment(shell: &mut Shell, command: &Command) -> CommandResult {
    let mut words = Vec::with_capacity(1 + command.args.len());
    words.push(command.name.clone());
    words.extend(command.args.iter().cloned());

    let split = words.iter().position(|w| !is_assignment_word(w));

    match split {
        None => {
            // Pure assignment segment: persist.
            for word in &words {
                let (name, value) = word.split_once('=').unwrap_or((word.as_str(), ""));
                shell.assign(name, value);
            }
            CommandResult::ok()
        }
        Some(at) => {
            // Temporary bindings around a real command.
            let mut saved: Vec<(String, Option<String>)> = Vec::new();
            for word in &words[..at] {
                let (name, value) = word.split_once('=').unwrap_or((word.as_str(), ""));
                saved.push((name.to_string(), shell.env.get(name).cloned()));
                shell.env.insert(name.to_string(), value.to_string());
            }

            let inner = Command {
                name: words[at].clone(),
                args: words[at + 1..].to_vec(),
                original_args: command.original_args.clone(),
                raw: command.raw.clone(),
                background: command.background,
                redirections: command.redirections.clone(),
            };
            let result = Box::pin(run_single(shell, &inner, None, inner.background)).await;

            for (name, previous) in saved {
                match previous {
                    Some(value) => shell.env.insert(name, value),
                    None => shell.env.remove(&name),
                };
            }
            result
        }
    }
}

fn resolve_stage(shell: &Shell, command: &Command) -> Result<ExternalStage, CommandResult> {
    let path_env = shell.env.get("PATH").cloned().unwrap_or_default();
    match resolve_executable(&command.name, &path_env, &shell.cwd) {
        Some(program) => Ok(ExternalStage {
            program,
            args: command.args.clone(),
            redirections: command.redirections.clone(),
        }),
        None => {
            // A path that names a real but non-executable file is 126,
            // everything else is 127.
            if command.name.contains('/') {
                let direct = if std::path::Path::new(&command.name).is_absolute() {
                    std::path::PathBuf::from(&command.name)
                } else {
                    std::path::Path::new(&shell.cwd).join(&command.name)
                };
                if direct.is_file() {
                    return Err(CommandResult::failure_with_code(
                        format!("{}: Permission denied\n", command.name),
                        126,
                    ));
                }
            }
            Err(CommandResult::failure_with_code(
                format!("{}: command not found\n", command.name),
                127,
            ))
        }
    }
}
