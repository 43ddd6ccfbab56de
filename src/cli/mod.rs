// SPDX-License-Identifier: Apache-2.0

mod serve;

use crate::collector::{aesmd, Exporter};

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Args, Parser, Subcommand};
use log::info;

/// Prometheus exporter for Intel SGX
///
/// Reports whether the CPU supports SGX, which SGX driver is loaded and
/// whether the aesmd service is running and able to issue launch tokens.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Options {
    /// Logging options
    #[clap(flatten)]
    logger: LogOptions,

    /// Subcommands (with their own options)
    #[clap(subcommand)]
    cmd: Subcommands,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        self.logger.init();

        info!("logging initialized!");
        info!("CLI opts: {:?}", self);

        self.cmd.dispatch()
    }
}

/// `sgx-exporter` subcommands and their options/arguments.
#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Serve the metrics over HTTP
    Serve(serve::Options),
    /// Probe once and print the metrics
    Test(test::Options),
}

impl Subcommands {
    fn dispatch(self) -> anyhow::Result<()> {
        match self {
            Self::Serve(cmd) => cmd.execute(),
            Self::Test(cmd) => cmd.execute(),
        }
    }
}

/// Common probe options
#[derive(Args, Debug)]
pub struct ProbeOptions {
    /// Path of the aesmd socket
    #[clap(
        long,
        env = "SGX_EXPORTER_AESMD_SOCKET",
        default_value = aesmd::AESM_SOCKET,
        parse(from_os_str)
    )]
    aesmd_socket: PathBuf,

    /// Seconds to wait on each read from or write to aesmd
    #[clap(
        long,
        env = "SGX_EXPORTER_AESMD_TIMEOUT",
        default_value = "15",
        parse(try_from_str = parse_timeout)
    )]
    aesmd_timeout: Duration,
}

impl ProbeOptions {
    pub fn exporter(&self) -> Exporter {
        Exporter::new(aesmd::Client::new(&self.aesmd_socket, self.aesmd_timeout))
    }
}

fn parse_timeout(s: &str) -> anyhow::Result<Duration> {
    let secs = u64::from_str(s)?;
    if secs == 0 {
        bail!("timeout must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

/// Common logging / output options
#[derive(Args, Debug)]
pub struct LogOptions {
    /// Increase log verbosity. Pass multiple times for more log output.
    ///
    /// By default we only show error messages. Passing `-v` will show warnings,
    /// `-vv` adds info, `-vvv` for debug, and `-vvvv` for trace.
    #[clap(long = "verbose", short = 'v', parse(from_occurrences))]
    verbosity: u8,

    /// Set fancier logging filters.
    ///
    /// This is equivalent to the `RUST_LOG` environment variable.
    /// For more info, see the `env_logger` crate documentation.
    #[clap(long = "log-filter", env = "SGX_EXPORTER_LOG")]
    log_filter: Option<String>,

    /// Set log output target ("stderr", "stdout")
    #[clap(long, default_value = "stderr")]
    log_target: LogTarget,
}

impl LogOptions {
    /// Build & initialize a global logger using env_logger::Builder.
    /// As with Builder::init(), this will panic if called more than once,
    /// or if another library has already initialized a global logger.
    pub fn init(&self) {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(self.verbosity_level())
            .parse_filters(self.log_filter.as_deref().unwrap_or_default())
            .target(self.log_target.into())
            .init();
    }

    /// Convert the -vvv.. count into a log level.
    fn verbosity_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Represents targets for debug logging.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
enum LogTarget {
    Stdout,
    Stderr,
}

/// Convert a str to a LogTarget. This is how Clap parses CLI args.
impl FromStr for LogTarget {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            _ => Err(anyhow!("unknown log target {:?}", s)),
        }
    }
}

/// Convert our LogTarget to env_logger's Target
impl From<LogTarget> for env_logger::Target {
    fn from(t: LogTarget) -> Self {
        match t {
            LogTarget::Stdout => Self::Stdout,
            LogTarget::Stderr => Self::Stderr,
        }
    }
}
