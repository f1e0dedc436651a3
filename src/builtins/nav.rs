//! cd and pwd

use std::path::Path;

use crate::exec::CommandResult;
use crate::hooks::DIRECTORY_CHANGE;
use crate::shell::Shell;

/// Change directory: `cd [dir]`, `cd -` (previous), `cd` / `cd ~`
/// (home). `PWD` and `OLDPWD` track the move.
pub fn cd(shell: &mut Shell, args: &[String]) -> CommandResult {
    let mut print_path = false;

    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with('-') || *a == "-").collect();
    let home = shell.env.get("HOME").cloned().unwrap_or_else(|| "/".to_string());

    let target = match positional.first().map(|s| s.as_str()) {
        None | Some("~") => home.clone(),
        Some("-") => {
            print_path = true;
            shell.previous_dir.clone()
        }
        Some(path) => match path.strip_prefix("~/") {
            Some(rest) => format!("{}/{}", home, rest),
            None => path.to_string(),
        },
    };

    if target.is_empty() {
        return CommandResult::failure("cd: no previous directory\n");
    }

    let resolved = if Path::new(&target).is_absolute() {
        normalize_path(&target)
    } else {
        normalize_path(&format!("{}/{}", shell.cwd, target))
    };

    let path = Path::new(&resolved);
    if !path.exists() {
        return CommandResult::failure(format!("cd: {}: No such file or directory\n", target));
    }
    if !path.is_dir() {
        return CommandResult::failure(format!("cd: {}: Not a directory\n", target));
    }

    shell.previous_dir = shell.cwd.clone();
    shell.cwd = resolved.clone();
    shell.env.insert("PWD".to_string(), shell.cwd.clone());
    shell.env.insert("OLDPWD".to_string(), shell.previous_dir.clone());
    shell
        .hooks
        .emit(DIRECTORY_CHANGE, &serde_json::json!({ "cwd": shell.cwd }));

    if print_path {
        CommandResult::new(format!("{}\n", resolved), String::new(), 0)
    } else {
        CommandResult::ok()
    }
}

pub fn pwd(shell: &Shell, _args: &[String]) -> CommandResult {
    CommandResult::new(format!("{}\n", shell.cwd), String::new(), 0)
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    let mut normalized = String::from("/");
    normalized.push_str(&joined);
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/a/b"), "/a/b");
        assert_eq!(normalize_path("/a/./b"), "/a/b");
        assert_eq!(normalize_path("/a/../b"), "/b");
        assert_eq!(normalize_path("/a//b"), "/a/b");
        assert_eq!(normalize_path("/a/b/../.."), "/");
    }

    #[cfg(unix)]
    #[test]
    fn test_cd_updates_pwd_and_oldpwd() {
        let mut shell = Shell::new(Config::for_tests());
        let start = shell.cwd.clone();
        let result = cd(&mut shell, &["/tmp".to_string()]);
        assert_eq!(result.exit_code, 0);
        assert_eq!(shell.cwd, "/tmp");
        assert_eq!(shell.env.get("PWD").map(String::as_str), Some("/tmp"));
        assert_eq!(shell.env.get("OLDPWD").cloned(), Some(start));
    }

    #[cfg(unix)]
    #[test]
    fn test_cd_dash_returns_and_prints() {
        let mut shell = Shell::new(Config::for_tests());
        let start = shell.cwd.clone();
        cd(&mut shell, &["/tmp".to_string()]);
        let result = cd(&mut shell, &["-".to_string()]);
        assert_eq!(result.exit_code, 0);
        assert_eq!(shell.cwd, start);
        assert_eq!(result.stdout, format!("{}\n", start));
    }

    #[test]
    fn test_cd_missing_directory() {
        let mut shell = Shell::new(Config::for_tests());
        let result = cd(&mut shell, &["/no/such/dir/xyzq".to_string()]);
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("No such file or directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cd_emits_directory_change() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let mut shell = Shell::new(Config::for_tests());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        shell.hooks.on(DIRECTORY_CHANGE, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        cd(&mut shell, &["/tmp".to_string()]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pwd() {
        let shell = Shell::new(Config::for_tests());
        let result = pwd(&shell, &[]);
        assert_eq!(result.stdout.trim(), shell.cwd);
    }
}
