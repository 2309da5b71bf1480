use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod apply;
pub mod show;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Request a configuration dump and print it as YAML.
    Show(ShowArgs),
    /// Transmit a YAML document to a generic-netlink family.
    Apply(ApplyArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Show(args) => show::run(args),
        Command::Apply(args) => apply::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Generic-netlink family name.
    #[arg(long)]
    pub family: String,
    /// Command number within the family.
    #[arg(long, short = 'c')]
    pub command: u8,
    /// Protocol version of the command.
    #[arg(long, default_value = "1")]
    pub version: u8,
    /// Keep reading asynchronous event notifications.
    #[arg(long)]
    pub stream: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// YAML document to transmit; stdin when omitted.
    pub file: Option<PathBuf>,
    /// Generic-netlink family name.
    #[arg(long)]
    pub family: String,
    /// Command number within the family.
    #[arg(long, short = 'c')]
    pub command: u8,
    /// Protocol version of the command.
    #[arg(long, default_value = "1")]
    pub version: u8,
}

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
