use std::process::{Command, ExitCode};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask", about = "Build tasks for flowtest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cargo fmt --check
    Fmt,
    /// Run cargo check
    Check,
    /// Run cargo clippy
    Clippy,
    /// Run cargo test, optionally filtered by test name
    Test {
        /// Only run tests whose name contains this string
        filter: Option<String>,
    },
    /// Build API docs with warnings denied
    Doc,
    /// Run all CI checks (fmt, check, clippy, doc, test)
    Ci,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Fmt => cmd_fmt(),
        Commands::Check => cmd_check(),
        Commands::Clippy => cmd_clippy(),
        Commands::Test { filter } => cmd_test(filter.as_deref()),
        Commands::Doc => cmd_doc(),
        Commands::Ci => cmd_ci(),
    }
}

fn cmd_fmt() -> Result<()> {
    cargo(&["fmt", "--all", "--check"], &[])
}

fn cmd_check() -> Result<()> {
    cargo(&["check", "--workspace", "--all-targets"], &[])
}

fn cmd_clippy() -> Result<()> {
    cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"], &[])
}

fn cmd_test(filter: Option<&str>) -> Result<()> {
    let mut args = vec!["test", "-p", "flowtest-core"];
    args.extend(filter);
    cargo(&args, &[])
}

fn cmd_doc() -> Result<()> {
    cargo(
        &["doc", "--workspace", "--no-deps"],
        &[("RUSTDOCFLAGS", "-D warnings")],
    )
}

fn cmd_ci() -> Result<()> {
    cmd_fmt()?;
    cmd_check()?;
    cmd_clippy()?;
    cmd_doc()?;
    cmd_test(None)?;
    Ok(())
}

fn cargo(args: &[&str], envs: &[(&str, &str)]) -> Result<()> {
    let cmd_line = format!("cargo {}", args.join(" "));
    eprintln!("$ {cmd_line}");

    let status = Command::new("cargo")
        .args(args)
        .envs(envs.iter().copied())
        .status()
        .with_context(|| format!("Failed to execute: {cmd_line}"))?;

    if !status.success() {
        let code_info = match status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        bail!("{cmd_line}: {code_info}");
    }
    Ok(())
}
