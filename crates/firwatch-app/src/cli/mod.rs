use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

mod validators;

pub use validators::validate_portal_date;

/// Top-level CLI entry point.
#[derive(Debug, Default, Parser)]
#[command(
    name = "firwatch",
    version,
    author,
    about = "Animal-protection FIR extraction service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP job server with the background cleanup sweep.
    Serve(ServeArgs),
    /// Run one extraction in the foreground and write the archive locally.
    Fetch(FetchArgs),
    /// List the district names accepted by the portal.
    Districts(DistrictsArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// First registration date, dd/mm/yyyy.
    #[arg(long, value_parser = validate_portal_date)]
    pub from: String,
    /// Last registration date, dd/mm/yyyy.
    #[arg(long, value_parser = validate_portal_date)]
    pub to: String,
    /// District name as listed by `firwatch districts`.
    #[arg(long)]
    pub district: String,
    /// Directory the archive is copied into (defaults to the current directory).
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,
    /// Show the browser window.
    #[arg(long)]
    pub headed: bool,
}

#[derive(Debug, Args)]
pub struct DistrictsArgs {
    /// Print `name<TAB>code` pairs instead of names only.
    #[arg(long)]
    pub codes: bool,
}
