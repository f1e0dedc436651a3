//! Job-control builtins: jobs, fg, bg, kill

use crate::exec::CommandResult;
use crate::jobs::{send_signal, JobStatus};
use crate::shell::Shell;

/// `jobs [-l]`: list tracked jobs. `+` marks the current job, `-` the
/// previous one; `-l` adds pids.
pub fn jobs(shell: &Shell, args: &[String]) -> CommandResult {
    let long = args.iter().any(|a| a == "-l");
    let current = shell.jobs.current_job();
    let previous = shell.jobs.previous_job();

    let mut out = String::new();
    for job in shell.jobs.jobs() {
        let marker = if Some(job.id) == current {
            '+'
        } else if Some(job.id) == previous {
            '-'
        } else {
            ' '
        };
        let suffix = if job.background && job.status == JobStatus::Running { " &" } else { "" };
        if long {
            out.push_str(&format!(
                "[{}]{} {:>7} {:<10} {}{}\n",
                job.id,
                marker,
                job.pid,
                job.status.as_str(),
                job.command,
                suffix
            ));
        } else {
            out.push_str(&format!(
                "[{}]{}  {:<10} {}{}\n",
                job.id,
                marker,
                job.status.as_str(),
                job.command,
                suffix
            ));
        }
    }
    CommandResult::new(out, String::new(), 0)
}

/// `fg [%job]`: bring a job to the foreground (default `%+`).
pub fn fg(shell: &Shell, args: &[String]) -> CommandResult {
    let token = args.first().map(String::as_str).unwrap_or("%+");
    let Some(id) = shell.jobs.resolve_job_designator(token) else {
        return CommandResult::failure(format!("fg: {}: no such job\n", token));
    };
    match shell.jobs.resume_job_foreground(id) {
        Ok(()) => {
            let command = shell.jobs.get(id).map(|j| j.command).unwrap_or_default();
            CommandResult::new(format!("{}\n", command), String::new(), 0)
        }
        Err(e) => CommandResult::failure(format!("fg: {}\n", e)),
    }
}

/// `bg [%job]`: continue a stopped job in the background.
pub fn bg(shell: &Shell, args: &[String]) -> CommandResult {
    let token = args.first().map(String::as_str).unwrap_or("%+");
    let Some(id) = shell.jobs.resolve_job_designator(token) else {
        return CommandResult::failure(format!("bg: {}: no such job\n", token));
    };
    match shell.jobs.resume_job_background(id) {
        Ok(()) => {
            let command = shell.jobs.get(id).map(|j| j.command).unwrap_or_default();
            CommandResult::new(format!("[{}]+ {} &\n", id, command), String::new(), 0)
        }
        Err(e) => CommandResult::failure(format!("bg: {}\n", e)),
    }
}

/// `kill [-s SIG | -SIG] target...`: signal jobs (`%` designators) or
/// raw pids.
pub fn kill(shell: &Shell, args: &[String]) -> CommandResult {
    let mut signal = libc::SIGTERM;
    let mut targets = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        if arg == "-s" {
            match iter.next().and_then(|name| parse_signal(name)) {
                Some(sig) => signal = sig,
                None => return CommandResult::failure_with_code("kill: -s requires a signal\n", 2),
            }
        } else if let Some(name) = arg.strip_prefix('-') {
            match parse_signal(name) {
                Some(sig) => signal = sig,
                None => {
                    return CommandResult::failure_with_code(
                        format!("kill: {}: invalid signal specification\n", arg),
                        2,
                    )
                }
            }
        } else {
            targets.push(arg.clone());
        }
    }

    if targets.is_empty() {
        return CommandResult::failure_with_code("kill: usage: kill [-s SIG] pid|%job ...\n", 2);
    }

    let mut stderr = String::new();
    for target in targets {
        if target.starts_with('%') {
            match shell.jobs.resolve_job_designator(&target) {
                Some(id) => {
                    if let Err(e) = shell.jobs.terminate_job(id, Some(signal)) {
                        stderr.push_str(&format!("kill: {}\n", e));
                    }
                }
                None => stderr.push_str(&format!("kill: {}: no such job\n", target)),
            }
        } else {
            match target.parse::<i32>() {
                Ok(pid) => {
                    if let Err(e) = send_signal(pid, signal) {
                        stderr.push_str(&format!("kill: ({}) - {}\n", pid, e));
                    }
                }
                Err(_) => stderr.push_str(&format!("kill: {}: arguments must be process or job IDs\n", target)),
            }
        }
    }

    if stderr.is_empty() {
        CommandResult::ok()
    } else {
        CommandResult::new(String::new(), stderr, 1)
    }
}

/// Accept `TERM`, `SIGTERM`, and numeric forms.
fn parse_signal(token: &str) -> Option<i32> {
    if let Ok(number) = token.parse::<i32>() {
        return (number > 0).then_some(number);
    }
    let name = token.trim_start_matches("SIG").to_ascii_uppercase();
    match name.as_str() {
        "HUP" => Some(libc::SIGHUP),
        "INT" => Some(libc::SIGINT),
        "QUIT" => Some(libc::SIGQUIT),
        "KILL" => Some(libc::SIGKILL),
        "TERM" => Some(libc::SIGTERM),
        "STOP" => Some(libc::SIGSTOP),
        "CONT" => Some(libc::SIGCONT),
        "USR1" => Some(libc::SIGUSR1),
        "USR2" => Some(libc::SIGUSR2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_signal_forms() {
        assert_eq!(parse_signal("9"), Some(9));
        assert_eq!(parse_signal("TERM"), Some(libc::SIGTERM));
        assert_eq!(parse_signal("SIGKILL"), Some(libc::SIGKILL));
        assert_eq!(parse_signal("term"), Some(libc::SIGTERM));
        assert_eq!(parse_signal("NOPE"), None);
        assert_eq!(parse_signal("-1"), None);
    }

    #[test]
    fn test_jobs_listing_markers() {
        let shell = Shell::new(Config::for_tests());
        let a = shell.jobs.add_job("sleep 5", 90001, true);
        let b = shell.jobs.add_job("sleep 6", 90002, true);
        let out = jobs(&shell, &[]).stdout;
        assert!(out.contains(&format!("[{}]-", a)));
        assert!(out.contains(&format!("[{}]+", b)));
        assert!(out.contains("sleep 5"));
        assert!(out.contains("Running"));
    }

    #[test]
    fn test_jobs_long_includes_pid() {
        let shell = Shell::new(Config::for_tests());
        shell.jobs.add_job("sleep 7", 90003, true);
        let out = jobs(&shell, &args(&["-l"])).stdout;
        assert!(out.contains("90003"));
    }

    #[test]
    fn test_fg_no_such_job() {
        let shell = Shell::new(Config::for_tests());
        let result = fg(&shell, &args(&["%42"]));
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("no such job"));
    }

    #[test]
    fn test_bg_no_such_job() {
        let shell = Shell::new(Config::for_tests());
        let result = bg(&shell, &[]);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn test_kill_usage() {
        let shell = Shell::new(Config::for_tests());
        assert_eq!(kill(&shell, &[]).exit_code, 2);
        assert_eq!(kill(&shell, &args(&["-BOGUS", "1"])).exit_code, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_job_designator() {
        let shell = Shell::new(Config::for_tests());
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30");
        cmd.process_group(0);
        let child = cmd.spawn().expect("spawn");
        let pid = child.id().unwrap() as i32;
        let id = shell.jobs.add_job("sleep 30", pid, true);

        let result = kill(&shell, &args(&["-s", "KILL", &format!("%{}", id)]));
        assert_eq!(result.exit_code, 0);
        shell.jobs.watch_exit(id, child);
        for _ in 0..50 {
            if shell.jobs.get(id).unwrap().status == JobStatus::Done {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(shell.jobs.get(id).unwrap().status, JobStatus::Done);
    }
}
