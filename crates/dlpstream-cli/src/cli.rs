use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use dlpstream_core::Likelihood;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dlpstream")]
#[command(
    author,
    version,
    about = "Redact sensitive data from files and logs and forward the result"
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "dlpstream.yaml", global = true)]
    pub config: String,

    /// Minimum likelihood a finding needs to be redacted
    #[arg(long, value_parser = parse_likelihood, global = true)]
    pub min_likelihood: Option<Likelihood>,

    /// Redaction service URL; the built-in pattern redactor is used when unset
    #[arg(long, env = "DLPSTREAM_CLASSIFIER_ENDPOINT", global = true)]
    pub classifier_endpoint: Option<String>,

    /// Write dropped-batch, lost-delivery and undelivered reports here as JSON lines on exit
    #[arg(long, global = true)]
    pub report_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9464
    #[arg(long, env = "DLPSTREAM_METRICS_ADDR", global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Redact files, then keep redacting lines appended to them
    Files {
        /// Files to read
        #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Detector identifiers, e.g. EMAIL_ADDRESS PHONE_NUMBER
        #[arg(
            short = 't',
            long = "type",
            required = true,
            num_args = 1..,
            value_parser = NonEmptyStringValueParser::new()
        )]
        detectors: Vec<String>,

        /// Read existing content only, do not follow appends
        #[arg(long)]
        no_follow: bool,
    },

    /// Redact entries of remote logs as they are written
    Logs {
        /// Log names to poll
        #[arg(
            short = 'l',
            long = "log",
            required = true,
            num_args = 1..,
            value_parser = NonEmptyStringValueParser::new()
        )]
        logs: Vec<String>,

        /// Detector identifiers, e.g. EMAIL_ADDRESS PHONE_NUMBER
        #[arg(
            short = 't',
            long = "type",
            required = true,
            num_args = 1..,
            value_parser = NonEmptyStringValueParser::new()
        )]
        detectors: Vec<String>,

        /// Log store URL, overriding the configuration file
        #[arg(long, env = "DLPSTREAM_LOG_STORE")]
        log_store: Option<String>,
    },
}

impl Commands {
    pub fn detectors(&self) -> &[String] {
        match self {
            Self::Files { detectors, .. } | Self::Logs { detectors, .. } => detectors,
        }
    }
}

fn parse_likelihood(s: &str) -> Result<Likelihood, String> {
    s.parse().map_err(|e: dlpstream_core::Error| e.to_string())
}
