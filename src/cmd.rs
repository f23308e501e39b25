use clap::{Parser, ValueEnum};
use std::fs::File;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(
        short,
        long,
        help = "Number of packets to generate. By default, use the \"count\" directive of the spec, or 1"
    )]
    pub count: Option<u64>,
    #[arg(short, long, value_enum, ignore_case = true, help = "Log verbosity")]
    pub log_level: Option<LogLevel>,
    #[arg(short = 's', long, help = "Seed for random number generation")]
    pub random_seed: Option<u64>,
    #[arg(help = "Output pcap file for synthetic network packets")]
    pub outfile: PathBuf,
    #[arg(value_parser = readable_file, help = "Spec file describing the packets")]
    pub spec: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            // there is no level above error
            LogLevel::Error | LogLevel::Fatal => log::LevelFilter::Error,
        }
    }
}

fn readable_file(s: &str) -> Result<PathBuf, String> {
    File::open(s)
        .map(|_| PathBuf::from(s))
        .map_err(|e| format!("cannot read {s}: {e}"))
}
