//! alias and unalias

use crate::exec::CommandResult;
use crate::shell::Shell;

/// `alias` lists definitions; `alias name=value` defines; `alias name`
/// prints one definition.
pub fn alias(shell: &mut Shell, args: &[String]) -> CommandResult {
    if args.is_empty() {
        let mut out = String::new();
        for (name, value) in shell.aliases.iter() {
            out.push_str(&format!("alias {}='{}'\n", name, value));
        }
        return CommandResult::new(out, String::new(), 0);
    }

    let mut out = String::new();
    let mut missing = Vec::new();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                shell.aliases.insert(name.to_string(), value.trim_matches('\'').to_string());
            }
            _ => match shell.aliases.get(arg.as_str()) {
                Some(value) => out.push_str(&format!("alias {}='{}'\n", arg, value)),
                None => missing.push(arg.clone()),
            },
        }
    }

    if missing.is_empty() {
        CommandResult::new(out, String::new(), 0)
    } else {
        let stderr = missing
            .iter()
            .map(|name| format!("alias: {}: not found\n", name))
            .collect::<String>();
        CommandResult::new(out, stderr, 1)
    }
}

/// `unalias name...` removes definitions; `unalias -a` removes all.
pub fn unalias(shell: &mut Shell, args: &[String]) -> CommandResult {
    if args.is_empty() {
        return CommandResult::failure_with_code("unalias: usage: unalias [-a] name [name ...]\n", 2);
    }
    if args.iter().any(|a| a == "-a") {
        shell.aliases.clear();
        return CommandResult::ok();
    }

    let mut missing = Vec::new();
    for name in args {
        if shell.aliases.shift_remove(name.as_str()).is_none() {
            missing.push(name.clone());
        }
    }
    if missing.is_empty() {
        CommandResult::ok()
    } else {
        let stderr = missing
            .iter()
            .map(|name| format!("unalias: {}: not found\n", name))
            .collect::<String>();
        CommandResult::new(String::new(), stderr, 1)
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
    fn test_define_and_list() {
        let mut shell = Shell::new(Config::for_tests());
        alias(&mut shell, &args(&["ll=ls -l"]));
        assert_eq!(shell.aliases.get("ll").map(String::as_str), Some("ls -l"));

        let result = alias(&mut shell, &[]);
        assert!(result.stdout.contains("alias ll='ls -l'"));
    }

    #[test]
    fn test_quoted_value() {
        let mut shell = Shell::new(Config::for_tests());
        alias(&mut shell, &args(&["gs='git status'"]));
        assert_eq!(shell.aliases.get("gs").map(String::as_str), Some("git status"));
    }

    #[test]
    fn test_print_single() {
        let mut shell = Shell::new(Config::for_tests());
        alias(&mut shell, &args(&["x=y"]));
        let result = alias(&mut shell, &args(&["x"]));
        assert_eq!(result.stdout, "alias x='y'\n");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn test_missing_alias_fails() {
        let mut shell = Shell::new(Config::for_tests());
        let result = alias(&mut shell, &args(&["nope"]));
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("not found"));
    }

    #[test]
    fn test_unalias() {
        let mut shell = Shell::new(Config::for_tests());
        alias(&mut shell, &args(&["a=b", "c=d"]));
        unalias(&mut shell, &args(&["a"]));
        assert!(shell.aliases.get("a").is_none());
        assert!(shell.aliases.get("c").is_some());
    }

    #[test]
    fn test_unalias_all() {
        let mut shell = Shell::new(Config::for_tests());
        alias(&mut shell, &args(&["a=b", "c=d"]));
        unalias(&mut shell, &args(&["-a"]));
        assert!(shell.aliases.is_empty());
    }

    #[test]
    fn test_unalias_usage_error() {
        let mut shell = Shell::new(Config::for_tests());
        assert_eq!(unalias(&mut shell, &[]).exit_code, 2);
    }
}
