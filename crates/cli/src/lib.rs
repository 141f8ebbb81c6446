pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "teamsforce",
    about = "Teamsforce operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, and revoke stored CRM sessions.",
    after_help = "Examples:\n  teamsforce doctor --json\n  teamsforce config\n  teamsforce logout --chat 19:abc@thread.v2 --provider salesforce"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database, LLM endpoint and OAuth redirect readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Delete stored Salesforce and/or Outlook tokens for a chat")]
    Logout {
        #[arg(long, help = "Teams chat id (or user id) that owns the tokens")]
        chat: String,
        #[arg(long, help = "salesforce or outlook; both when omitted")]
        provider: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Logout { chat, provider } => commands::logout::run(&chat, provider.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
