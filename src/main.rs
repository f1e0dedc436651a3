use std::io::IsTerminal;
use std::io::Write;

use clap::Parser;
use coquille::config::Config;
use coquille::shell::Shell;

#[derive(Parser)]
#[command(name = "coquille")]
#[command(about = "An interactive POSIX-flavored shell")]
#[command(version)]
struct Cli {
    /// Execute the command string and exit
    #[arg(short = 'c')]
    command: Option<String>,

    /// Exit immediately if a command exits with non-zero status
    #[arg(short = 'e', long = "errexit")]
    errexit: bool,

    /// Configuration file (defaults to ~/.config/coquille/config.toml)
    #[arg(long = "config")]
    config: Option<String>,

    /// Output the result as JSON (stdout, stderr, exitCode)
    #[arg(long = "json")]
    json: bool,

    /// Log level: off, error, warn, info, debug
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,

    /// Script file to execute
    #[arg()]
    script_file: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = Config::load(cli.config.as_deref().map(std::path::Path::new));
    let mut shell = Shell::new(config);
    if cli.errexit {
        shell.options.errexit = true;
    }

    // One-shot: -c string or a script file.
    let script = if let Some(command) = cli.command {
        Some(command)
    } else if let Some(ref file) = cli.script_file {
        match std::fs::read_to_string(file) {
            Ok(content) => Some(content),
            Err(e) => {
                eprintln!("coquille: {}: {}", file, e);
                std::process::exit(127);
            }
        }
    } else {
        None
    };

    if let Some(script) = script {
        let result = shell.run_line(&script).await;
        if cli.json {
            println!(
                "{}",
                serde_json::json!({
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "exitCode": result.exit_code,
                })
            );
        } else {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
        }
        shell.shutdown();
        std::process::exit(shell.should_exit.unwrap_or(result.exit_code));
    }

    // Piped stdin: run it all as one script.
    if !std::io::stdin().is_terminal() {
        let mut buf = String::new();
        use std::io::Read;
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        let result = shell.run_line(&buf).await;
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        shell.shutdown();
        std::process::exit(shell.should_exit.unwrap_or(result.exit_code));
    }

    // Interactive REPL.
    if !shell.config.test_mode {
        shell.jobs.install_signal_handlers();
    }
    let exit_code = repl(&mut shell).await;
    shell.shutdown();
    std::process::exit(exit_code);
}

async fn repl(shell: &mut Shell) -> i32 {
    use tokio::io::{AsyncBufReadExt, BufReader};

    // Surface background-job completion between prompts.
    let jobs = shell.jobs.clone();
    shell.jobs.on_event(Box::new(move |event| {
        if let coquille::jobs::JobEvent::Done { id, exit_code, .. } = event {
            let Some(job) = jobs.get(*id) else { return };
            if !job.background {
                return;
            }
            match exit_code {
                Some(0) | None => eprintln!("[{}]  Done        {}", id, job.command),
                Some(code) => eprintln!("[{}]  exited with code {}    {}", id, code, job.command),
            }
        }
    }));

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let prompt = shell.config.prompt.clone();
        print!("{}", prompt);
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("coquille: {}", e);
                break;
            }
        };

        let result = shell.run_line(&line).await;
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);

        if let Some(code) = shell.should_exit {
            return code;
        }
    }

    shell.last_exit_code
}

fn init_logging(level: &str) {
    use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

    let filter = match level {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        _ => LevelFilter::Warn,
    };
    let _ = TermLogger::init(
        filter,
        ConfigBuilder::new().set_time_level(LevelFilter::Off).build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}
