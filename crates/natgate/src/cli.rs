use clap::{Parser, Subcommand, ValueEnum};

use domain::rule::entity::Table;
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "natgate",
    about = "Zone-based NAT redirect policy compiler",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration and report the admitted records
    Check,

    /// Compile redirect records into iptables rules on stdout
    Compile {
        /// Restrict output to a single table
        #[arg(long)]
        table: Option<TableArg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TableArg {
    Filter,
    Nat,
    Raw,
}

impl From<TableArg> for Table {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Filter => Table::Filter,
            TableArg::Nat => Table::Nat,
            TableArg::Raw => Table::Raw,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
