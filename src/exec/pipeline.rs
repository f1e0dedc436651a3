//! Pipeline Spawning
//!
//! Launches the external stages of a pipeline as OS processes in one
//! new process group, wires adjacent stages together with OS pipes,
//! applies redirections, and captures stdout/stderr through concurrent
//! reader tasks. Foreground pipelines are awaited (with an optional
//! timeout that escalates SIGTERM to SIGKILL); background pipelines
//! detach and report through the job manager's exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};

use crate::exec::CommandResult;
use crate::jobs::decompose_status;
use crate::parser::redirection::{RedirKind, Redirection};
use crate::shell::Shell;

/// One resolved external stage.
#[derive(Debug)]
pub struct ExternalStage {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub redirections: Vec<Redirection>,
}

/// SIGTERM-to-SIGKILL grace period on timeout.
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Run a pipeline of external commands.
pub async fn run_external_pipeline(
    shell: &mut Shell,
    stages: &[ExternalStage],
    background: bool,
    stdin_data: Option<String>,
    command_text: &str,
) -> CommandResult {
    debug_assert!(!stages.is_empty());
    let started = Instant::now();

    let mut children: Vec<Child> = Vec::with_capacity(stages.len());
    let mut leader_pid: i32 = 0;
    let mut stderr_merged_to_stdout = vec![false; stages.len()];

    for (index, stage) in stages.iter().enumerate() {
        let is_first = index == 0;
        let is_last = index + 1 == stages.len();

        let mut cmd = ProcessCommand::new(&stage.program);
        cmd.args(&stage.args);
        cmd.current_dir(&shell.cwd);
        for (key, value) in shell.exported_env() {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        cmd.process_group(if is_first { 0 } else { leader_pid });

        // stdin: previous stage's pipe, a redirection, fed data, the
        // terminal (foreground), or nothing (background).
        if let Some(prev) = children.last_mut() {
            #[cfg(unix)]
            match prev.stdout.take().and_then(|out| out.into_owned_fd().ok()) {
                Some(fd) => {
                    cmd.stdin(Stdio::from(fd));
                }
                None => {
                    cmd.stdin(Stdio::null());
                }
            }
            #[cfg(not(unix))]
            {
                let _ = prev;
                cmd.stdin(Stdio::null());
            }
        } else if let Some(redir) = find_redirection(&stage.redirections, RedirKind::In) {
            match open_input(&redir.target, &shell.cwd) {
                Ok(file) => {
                    cmd.stdin(Stdio::from(file));
                }
                Err(e) => return CommandResult::failure(format!("{}: {}\n", redir.target, e)),
            }
        } else if stdin_data.is_some() {
            cmd.stdin(Stdio::piped());
        } else if background {
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(Stdio::inherit());
        }

        // stdout: a pipe to the next stage, a redirection, or capture.
        if !is_last {
            cmd.stdout(Stdio::piped());
        } else if let Some(redir) = find_output_redirection(&stage.redirections) {
            match open_output(&redir.target, &shell.cwd, is_append(redir.kind)) {
                Ok(file) => {
                    cmd.stdout(Stdio::from(file));
                }
                Err(e) => return CommandResult::failure(format!("{}: {}\n", redir.target, e)),
            }
        } else if background {
            cmd.stdout(Stdio::null());
        } else {
            cmd.stdout(Stdio::piped());
        }

        // stderr: a redirection, merged into stdout for `2>&1`, or
        // captured.
        match find_stderr_redirection(&stage.redirections) {
            Some(redir) if redir.target == "&1" => {
                stderr_merged_to_stdout[index] = true;
                cmd.stderr(Stdio::piped());
            }
            Some(redir) => match open_output(&redir.target, &shell.cwd, is_append(redir.kind)) {
                Ok(file) => {
                    cmd.stderr(Stdio::from(file));
                }
                Err(e) => return CommandResult::failure(format!("{}: {}\n", redir.target, e)),
            },
            None if background => {
                cmd.stderr(Stdio::null());
            }
            None => {
                cmd.stderr(Stdio::piped());
            }
        }

        match cmd.spawn() {
            Ok(child) => {
                if is_first {
                    leader_pid = child.id().map(|pid| pid as i32).unwrap_or(0);
                }
                children.push(child);
            }
            Err(e) => {
                // Spawn failure: reap what already started.
                for mut started_child in children {
                    let _ = started_child.start_kill();
                }
                return CommandResult::failure(format!(
                    "{}: {}\n",
                    stage.program.display(),
                    e
                ));
            }
        }
    }

    // Feed provided stdin to the first stage.
    if let Some(data) = stdin_data {
        if let Some(mut stdin) = children[0].stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(data.as_bytes()).await;
            });
        }
    }

    let job_id = shell.jobs.add_job(command_text, leader_pid, background);

    if background {
        // Detach: the leader's exit drives the job lifecycle; the other
        // stages are reaped by the runtime.
        let mut children = children;
        let leader = children.remove(0);
        shell.jobs.watch_exit(job_id, leader);
        shell.env.insert("!".to_string(), leader_pid.to_string());
        return CommandResult::ok().with_duration(started.elapsed().as_millis() as u64);
    }

    // Concurrent capture of the last stage's stdout and every stage's
    // stderr.
    let stdout_task = children
        .last_mut()
        .and_then(|child| child.stdout.take())
        .map(|mut out| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf).await;
                buf
            })
        });
    let stderr_tasks: Vec<_> = children
        .iter_mut()
        .map(|child| {
            child.stderr.take().map(|mut err| {
                tokio::spawn(async move {
                    let mut buf = String::new();
                    let _ = err.read_to_string(&mut buf).await;
                    buf
                })
            })
        })
        .collect();

    // Wait for every stage; the pipeline's status is the last stage's.
    let timeout_ms = shell.config.command_timeout_ms;
    let mut last_status = None;
    let mut timed_out = false;
    for child in children.iter_mut() {
        let status = if timeout_ms > 0 && !timed_out {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    timed_out = true;
                    let _ = shell.jobs.terminate_job(job_id, None);
                    tokio::time::sleep(KILL_GRACE).await;
                    let _ = crate::jobs::send_signal(-leader_pid, libc::SIGKILL);
                    child.wait().await
                }
            }
        } else {
            child.wait().await
        };
        last_status = Some(status);
    }

    let (exit_code, signal) = match last_status {
        Some(Ok(status)) => {
            let (code, signal) = decompose_status(&status);
            (code.unwrap_or(1), signal)
        }
        Some(Err(e)) => {
            shell.jobs.mark_done(job_id, Some(1), None);
            return CommandResult::failure(format!("wait: {}\n", e));
        }
        None => (1, None),
    };

    let mut stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let mut stderr = String::new();
    for (index, task) in stderr_tasks.into_iter().enumerate() {
        if let Some(task) = task {
            let captured = task.await.unwrap_or_default();
            if stderr_merged_to_stdout[index] {
                stdout.push_str(&captured);
            } else {
                stderr.push_str(&captured);
            }
        }
    }

    shell.jobs.mark_done(job_id, Some(exit_code), signal);

    if let Some(sig) = signal {
        stderr.push_str(&format!("terminated by signal {}\n", sig));
    }

    CommandResult {
        exit_code,
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis() as u64,
        success: exit_code == 0,
    }
}

/// Write a builtin's captured output through its redirections.
///
/// Builtins run in-process, so file redirections are applied after the
/// fact: redirected streams are written out and removed from the
/// result.
pub fn apply_result_redirections(
    result: &mut CommandResult,
    redirections: &[Redirection],
    cwd: &str,
) {
    for redir in redirections {
        let append = is_append(redir.kind);
        match redir.kind {
            RedirKind::Out | RedirKind::Append => {
                let data = result.stdout.clone();
                if write_stream(&redir.target, cwd, append, &data, result, redir) {
                    result.stdout.clear();
                }
            }
            RedirKind::Err | RedirKind::ErrAppend => {
                if redir.target == "&1" {
                    let merged = std::mem::take(&mut result.stderr);
                    result.stdout.push_str(&merged);
                } else {
                    let data = result.stderr.clone();
                    if write_stream(&redir.target, cwd, append, &data, result, redir) {
                        result.stderr.clear();
                    }
                }
            }
            RedirKind::Both | RedirKind::BothAppend => {
                let data = format!("{}{}", result.stdout, result.stderr);
                if write_stream(&redir.target, cwd, append, &data, result, redir) {
                    result.stdout.clear();
                    result.stderr.clear();
                }
            }
            RedirKind::In => {}
        }
    }
}

fn write_stream(
    target: &str,
    cwd: &str,
    append: bool,
    data: &str,
    result: &mut CommandResult,
    redir: &Redirection,
) -> bool {
    match open_output(target, cwd, append) {
        Ok(mut file) => {
            use std::io::Write;
            if let Err(e) = file.write_all(data.as_bytes()) {
                result.stderr.push_str(&format!("{}: {}\n", redir.target, e));
                result.exit_code = 1;
                result.success = false;
                return false;
            }
            true
        }
        Err(e) => {
            result.stderr.push_str(&format!("{}: {}\n", redir.target, e));
            result.exit_code = 1;
            result.success = false;
            false
        }
    }
}

/// Read the contents of a `< file` redirection target.
pub fn read_input_redirection(
    redirections: &[Redirection],
    cwd: &str,
) -> Result<Option<String>, String> {
    match find_redirection(redirections, RedirKind::In) {
        Some(redir) => {
            let path = resolve_path(&redir.target, cwd);
            std::fs::read_to_string(&path)
                .map(Some)
                .map_err(|e| format!("{}: {}", redir.target, e))
        }
        None => Ok(None),
    }
}

fn is_append(kind: RedirKind) -> bool {
    matches!(kind, RedirKind::Append | RedirKind::ErrAppend | RedirKind::BothAppend)
}

fn find_redirection(redirections: &[Redirection], kind: RedirKind) -> Option<&Redirection> {
    redirections.iter().rev().find(|r| r.kind == kind)
}

/// Last stdout-affecting redirection wins.
fn find_output_redirection(redirections: &[Redirection]) -> Option<&Redirection> {
    redirections.iter().rev().find(|r| {
        matches!(
            r.kind,
            RedirKind::Out | RedirKind::Append | RedirKind::Both | RedirKind::BothAppend
        )
    })
}

fn find_stderr_redirection(redirections: &[Redirection]) -> Option<&Redirection> {
    redirections.iter().rev().find(|r| {
        matches!(
            r.kind,
            RedirKind::Err | RedirKind::ErrAppend | RedirKind::Both | RedirKind::BothAppend
        )
    })
}

fn resolve_path(target: &str, cwd: &str) -> PathBuf {
    if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        Path::new(cwd).join(target)
    }
}

fn open_input(target: &str, cwd: &str) -> std::io::Result<std::fs::File> {
    std::fs::File::open(resolve_path(target, cwd))
}

fn open_output(target: &str, cwd: &str, append: bool) -> std::io::Result<std::fs::File> {
    let path = resolve_path(target, cwd);
    if append {
        std::fs::OpenOptions::new().create(true).append(true).open(path)
    } else {
        std::fs::File::create(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::expansion::cache::resolve_executable;

    fn shell() -> Shell {
        Shell::new(Config::for_tests())
    }

    fn stage(shell: &Shell, name: &str, args: &[&str]) -> ExternalStage {
        let path_env = shell.env.get("PATH").cloned().unwrap_or_default();
        ExternalStage {
            program: resolve_executable(name, &path_env, &shell.cwd).expect("resolve"),
            args: args.iter().map(|s| s.to_string()).collect(),
            redirections: Vec::new(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_stage_capture() {
        let mut sh = shell();
        let stages = vec![stage(&sh, "echo", &["hello"])];
        let result = run_external_pipeline(&mut sh, &stages, false, None, "echo hello").await;
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);
        assert!(result.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_two_stage_pipeline() {
        let mut sh = shell();
        let stages = vec![stage(&sh, "echo", &["a"]), stage(&sh, "tr", &["a-z", "A-Z"])];
        let result = run_external_pipeline(&mut sh, &stages, false, None, "echo a | tr a-z A-Z").await;
        assert_eq!(result.stdout, "A\n");
        assert_eq!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_last_stage() {
        let mut sh = shell();
        let stages = vec![stage(&sh, "echo", &["x"]), stage(&sh, "false", &[])];
        let result = run_external_pipeline(&mut sh, &stages, false, None, "echo x | false").await;
        assert_ne!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_data_feeds_first_stage() {
        let mut sh = shell();
        let stages = vec![stage(&sh, "cat", &[])];
        let result =
            run_external_pipeline(&mut sh, &stages, false, Some("fed\n".into()), "cat").await;
        assert_eq!(result.stdout, "fed\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_redirection() {
        let mut sh = shell();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let mut echo = stage(&sh, "echo", &["written"]);
        echo.redirections.push(Redirection {
            fd: 1,
            kind: RedirKind::Out,
            target: target.to_string_lossy().into_owned(),
        });
        let result = run_external_pipeline(&mut sh, &[echo], false, None, "echo written > f").await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "written\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_append_redirection() {
        let mut sh = shell();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("log");
        std::fs::write(&target, "first\n").unwrap();
        let mut echo = stage(&sh, "echo", &["second"]);
        echo.redirections.push(Redirection {
            fd: 1,
            kind: RedirKind::Append,
            target: target.to_string_lossy().into_owned(),
        });
        run_external_pipeline(&mut sh, &[echo], false, None, "echo second >> log").await;
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "first\nsecond\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_redirection() {
        let mut sh = shell();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.txt");
        std::fs::write(&source, "line1\nline2\n").unwrap();
        let mut wc = stage(&sh, "wc", &["-l"]);
        wc.redirections.push(Redirection {
            fd: 0,
            kind: RedirKind::In,
            target: source.to_string_lossy().into_owned(),
        });
        let result = run_external_pipeline(&mut sh, &[wc], false, None, "wc -l < in.txt").await;
        assert_eq!(result.stdout.trim(), "2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_detaches_immediately() {
        let mut sh = shell();
        let stages = vec![stage(&sh, "sleep", &["5"])];
        let started = Instant::now();
        let result = run_external_pipeline(&mut sh, &stages, true, None, "sleep 5 &").await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.exit_code, 0);
        let jobs = sh.jobs.jobs();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].background);
        let _ = sh.jobs.terminate_job(jobs[0].id, Some(libc::SIGKILL));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_termination_reports_128_plus() {
        let mut sh = shell();
        let path_env = sh.env.get("PATH").cloned().unwrap_or_default();
        let program = resolve_executable("sh", &path_env, &sh.cwd).unwrap();
        let stages = vec![ExternalStage {
            program,
            args: vec!["-c".into(), "kill -TERM $$".into()],
            redirections: Vec::new(),
        }];
        let result = run_external_pipeline(&mut sh, &stages, false, None, "sh -c ...").await;
        assert_eq!(result.exit_code, 128 + libc::SIGTERM);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_pipeline() {
        let mut config = Config::for_tests();
        config.command_timeout_ms = 300;
        let mut sh = Shell::new(config);
        let stages = vec![stage(&sh, "sleep", &["30"])];
        let started = Instant::now();
        let result = run_external_pipeline(&mut sh, &stages, false, None, "sleep 30").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_ne!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_merge_into_stdout() {
        let mut sh = shell();
        let path_env = sh.env.get("PATH").cloned().unwrap_or_default();
        let program = resolve_executable("sh", &path_env, &sh.cwd).unwrap();
        let mut stage = ExternalStage {
            program,
            args: vec!["-c".into(), "echo oops >&2".into()],
            redirections: Vec::new(),
        };
        stage.redirections.push(Redirection {
            fd: 2,
            kind: RedirKind::Err,
            target: "&1".into(),
        });
        let result = run_external_pipeline(&mut sh, &[stage], false, None, "sh -c ... 2>&1").await;
        assert_eq!(result.stdout, "oops\n");
        assert_eq!(result.stderr, "");
    }

    #[test]
    fn test_apply_result_redirections_out() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("captured");
        let mut result = CommandResult::new("payload\n".into(), String::new(), 0);
        apply_result_redirections(
            &mut result,
            &[Redirection {
                fd: 1,
                kind: RedirKind::Out,
                target: target.to_string_lossy().into_owned(),
            }],
            "/",
        );
        assert_eq!(result.stdout, "");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "payload\n");
    }
}
