//! Environment builtins: export, unset, set, env

use crate::exec::CommandResult;
use crate::shell::Shell;

/// `export [-p] [NAME[=value]...]`: write the shell map and mirror to
/// the process environment so children see the variable.
pub fn export(shell: &mut Shell, args: &[String]) -> CommandResult {
    let names: Vec<&String> = args.iter().filter(|a| *a != "-p").collect();

    if names.is_empty() {
        let mut exported: Vec<&String> = shell.exported.iter().collect();
        exported.sort();
        let mut out = String::new();
        for name in exported {
            match shell.env.get(name) {
                Some(value) => out.push_str(&format!("export {}=\"{}\"\n", name, value)),
                None => out.push_str(&format!("export {}\n", name)),
            }
        }
        return CommandResult::new(out, String::new(), 0);
    }

    for word in names {
        match word.split_once('=') {
            Some((name, value)) => {
                if !is_valid_name(name) {
                    return CommandResult::failure(format!("export: `{}': not a valid identifier\n", word));
                }
                shell.env.insert(name.to_string(), value.to_string());
                shell.exported.insert(name.to_string());
                std::env::set_var(name, value);
            }
            None => {
                if !is_valid_name(word) {
                    return CommandResult::failure(format!("export: `{}': not a valid identifier\n", word));
                }
                shell.exported.insert(word.to_string());
                if let Some(value) = shell.env.get(word.as_str()) {
                    std::env::set_var(word, value);
                }
            }
        }
    }
    CommandResult::ok()
}

/// `unset [-f] [-v] NAME...`: `-v` variables only, `-f` functions
/// only; by default a variable is removed first, then a function of
/// the same name.
pub fn unset(shell: &mut Shell, args: &[String]) -> CommandResult {
    let mut functions_only = false;
    let mut variables_only = false;
    let mut names = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-f" => functions_only = true,
            "-v" => variables_only = true,
            _ => names.push(arg),
        }
    }

    for name in names {
        if functions_only {
            shell.functions.shift_remove(name.as_str());
            continue;
        }
        let had_var = shell.env.remove(name.as_str()).is_some();
        shell.exported.remove(name.as_str());
        std::env::remove_var(name.as_str());
        if !variables_only && !had_var {
            shell.functions.shift_remove(name.as_str());
        }
    }
    CommandResult::ok()
}

/// `set [-e|+e] [-u|+u] [-x|+x] [-a|+a]`: option toggles. With no
/// arguments, print the environment sorted.
pub fn set(shell: &mut Shell, args: &[String]) -> CommandResult {
    if args.is_empty() {
        let mut pairs: Vec<(&String, &String)> = shell.env.iter().collect();
        pairs.sort_by_key(|(name, _)| name.as_str());
        let mut out = String::new();
        for (name, value) in pairs {
            out.push_str(&format!("{}={}\n", name, value));
        }
        return CommandResult::new(out, String::new(), 0);
    }

    let mut index = 0;
    while index < args.len() {
        let arg = &args[index];
        let (enable, flags) = match arg.as_bytes().first() {
            Some(b'-') => (true, &arg[1..]),
            Some(b'+') => (false, &arg[1..]),
            _ => return CommandResult::failure_with_code(format!("set: unknown option {}\n", arg), 2),
        };
        if flags == "o" {
            // Long form: `set -o errexit`, `set +o xtrace`, ...
            index += 1;
            match args.get(index).map(String::as_str) {
                Some("errexit") => shell.options.errexit = enable,
                Some("nounset") => shell.options.nounset = enable,
                Some("xtrace") => shell.options.xtrace = enable,
                Some("allexport") => shell.options.allexport = enable,
                Some(other) => {
                    return CommandResult::failure_with_code(
                        format!("set: {}: unknown option name\n", other),
                        2,
                    )
                }
                None => {
                    let options = &shell.options;
                    let mut out = String::new();
                    for (name, on) in [
                        ("allexport", options.allexport),
                        ("errexit", options.errexit),
                        ("nounset", options.nounset),
                        ("xtrace", options.xtrace),
                    ] {
                        out.push_str(&format!("{:<12}{}\n", name, if on { "on" } else { "off" }));
                    }
                    return CommandResult::new(out, String::new(), 0);
                }
            }
            index += 1;
            continue;
        }
        for flag in flags.chars() {
            match flag {
                'e' => shell.options.errexit = enable,
                'u' => shell.options.nounset = enable,
                'x' => shell.options.xtrace = enable,
                'a' => shell.options.allexport = enable,
                _ => {
                    return CommandResult::failure_with_code(
                        format!("set: unknown option {}{}\n", if enable { '-' } else { '+' }, flag),
                        2,
                    )
                }
            }
        }
        index += 1;
    }
    CommandResult::ok()
}

/// `env [NAME=value...] [command args...]`: with a command, run it
/// with the bindings applied for that invocation only; otherwise print
/// the environment.
pub async fn env_cmd(shell: &mut Shell, args: &[String]) -> CommandResult {
    let mut overrides = Vec::new();
    let mut index = 0;
    while index < args.len() {
        match args[index].split_once('=') {
            Some((name, value)) if is_valid_name(name) => {
                overrides.push((name.to_string(), value.to_string()));
                index += 1;
            }
            _ => break,
        }
    }

    if index >= args.len() {
        let mut out = String::new();
        for (name, value) in shell.env.iter() {
            out.push_str(&format!("{}={}\n", name, value));
        }
        for (name, value) in &overrides {
            out.push_str(&format!("{}={}\n", name, value));
        }
        return CommandResult::new(out, String::new(), 0);
    }

    // Apply overrides, run the command line, restore.
    let mut saved = Vec::with_capacity(overrides.len());
    for (name, value) in &overrides {
        saved.push((name.clone(), shell.env.get(name).cloned()));
        shell.env.insert(name.clone(), value.clone());
    }

    let line = args[index..].join(" ");
    let result = shell.run_line(&line).await;

    for (name, previous) in saved {
        match previous {
            Some(value) => shell.env.insert(name, value),
            None => shell.env.remove(&name),
        };
    }
    result
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
