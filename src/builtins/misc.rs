//! exit, source, time, reload

use std::path::Path;
use std::time::Instant;

use crate::exec::CommandResult;
use crate::shell::Shell;

/// `exit [code]`: flag the shell for termination. The REPL and script
/// engine stop at the next statement boundary.
pub fn exit(shell: &mut Shell, args: &[String]) -> CommandResult {
    let code = match args.first() {
        Some(arg) => match arg.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                return CommandResult::failure_with_code(
                    format!("exit: {}: numeric argument required\n", arg),
                    2,
                )
            }
        },
        None => shell.last_exit_code,
    };
    shell.should_exit = Some(code);
    CommandResult::new(String::new(), String::new(), code)
}

/// `source file` (also `.`): run a script file in the current shell,
/// so its assignments, aliases, and functions persist.
pub async fn source(shell: &mut Shell, args: &[String]) -> CommandResult {
    let Some(file) = args.first() else {
        return CommandResult::failure_with_code("source: filename argument required\n", 2);
    };

    let path = if Path::new(file).is_absolute() {
        file.clone()
    } else {
        format!("{}/{}", shell.cwd, file)
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => return CommandResult::failure(format!("source: {}: {}\n", file, e)),
    };

    shell.run_line(&content).await
}

/// `time command...`: run the command line and report elapsed wall
/// time on stderr.
pub async fn time(shell: &mut Shell, args: &[String]) -> CommandResult {
    if args.is_empty() {
        return CommandResult::new(String::new(), "real\t0m0.000s\n".to_string(), 0);
    }

    let line = args.join(" ");
    let started = Instant::now();
    let mut result = shell.run_line(&line).await;
    let elapsed = started.elapsed();

    result.stderr.push_str(&format!(
        "\nreal\t{}m{:.3}s\n",
        elapsed.as_secs() / 60,
        (elapsed.as_millis() as f64 % 60_000.0) / 1000.0
    ));
    result
}

/// `reload`: re-read the configuration file and re-apply cache caps.
pub fn reload(shell: &mut Shell, _args: &[String]) -> CommandResult {
    shell.config = crate::config::Config::load(None);
    crate::expansion::cache::set_cache_caps(
        shell.config.arg_cache_cap,
        shell.config.executable_cache_cap,
        shell.config.arithmetic_cache_cap,
    );
    CommandResult::new("configuration reloaded\n".to_string(), String::new(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exit_with_code() {
        let mut shell = Shell::new(Config::for_tests());
        let result = exit(&mut shell, &args(&["42"]));
        assert_eq!(result.exit_code, 42);
        assert_eq!(shell.should_exit, Some(42));
    }

    #[test]
    fn test_exit_defaults_to_last_code() {
        let mut shell = Shell::new(Config::for_tests());
        shell.set_last_exit(3);
        exit(&mut shell, &[]);
        assert_eq!(shell.should_exit, Some(3));
    }

    #[test]
    fn test_exit_non_numeric() {
        let mut shell = Shell::new(Config::for_tests());
        let result = exit(&mut shell, &args(&["abc"]));
        assert_eq!(result.exit_code, 2);
        assert!(shell.should_exit.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_source_runs_script_in_current_shell() {
        let mut shell = Shell::new(Config::for_tests());
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("setup.sh");
        std::fs::write(&script, "SOURCED_VALUE=from-file\necho loaded\n").unwrap();

        let result = source(&mut shell, &args(&[&script.display().to_string()])).await;
        assert_eq!(result.stdout, "loaded\n");
        assert_eq!(shell.env.get("SOURCED_VALUE").map(String::as_str), Some("from-file"));
    }

    #[tokio::test]
    async fn test_source_missing_file() {
        let mut shell = Shell::new(Config::for_tests());
        let result = source(&mut shell, &args(&["/no/such/file.sh"])).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("source:"));
    }

    #[tokio::test]
    async fn test_source_requires_argument() {
        let mut shell = Shell::new(Config::for_tests());
        assert_eq!(source(&mut shell, &[]).await.exit_code, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_time_reports_elapsed() {
        let mut shell = Shell::new(Config::for_tests());
        let result = time(&mut shell, &args(&["echo", "timed"])).await;
        assert_eq!(result.stdout, "timed\n");
        assert!(result.stderr.contains("real\t"));
        assert_eq!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_time_propagates_exit_code() {
        let mut shell = Shell::new(Config::for_tests());
        let result = time(&mut shell, &args(&["false"])).await;
        assert_ne!(result.exit_code, 0);
    }
}
