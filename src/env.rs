use alloy::primitives::Address;
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use url::Url;

use crate::lookup::LookupRequest;
use crate::onchain::backfill::FetchConfig;
use crate::rpc::RetryPolicy;
use crate::telemetry::{TelemetryGuard, setup_telemetry};

#[derive(clap::ValueEnum, Debug, Clone)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        (&log_level).into()
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "arena-record")]
#[command(about = "Win/loss record of an arena player, read from on-chain GameResult events")]
#[command(version)]
pub struct Env {
    /// JSON-RPC endpoint of the chain
    #[clap(long, env)]
    pub rpc_url: Url,
    /// Address of the contract emitting GameResult events
    #[clap(long, env)]
    pub contract: Address,
    /// Player whose record is computed (case-insensitive)
    #[clap(long, env)]
    pub player: String,
    /// First day to include, YYYY-MM-DD
    #[clap(long, env)]
    pub start_date: Option<NaiveDate>,
    /// Last day to include, YYYY-MM-DD
    #[clap(long, env)]
    pub end_date: Option<NaiveDate>,
    /// IANA timezone for day boundaries, the local zone when omitted
    #[clap(long, env)]
    pub timezone: Option<Tz>,
    /// Block spans sent together in one batched eth_getLogs call
    #[clap(long, env, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub batch_size: u8,
    /// Pause in milliseconds between batched calls
    #[clap(long, env, default_value = "400")]
    pub batch_delay_ms: u64,
    /// Total attempts per RPC call before giving up
    #[clap(long, env, default_value = "5", value_parser = clap::value_parser!(u16).range(1..))]
    pub rpc_attempts: u16,
    /// Base delay in milliseconds of the exponential retry backoff
    #[clap(long, env, default_value = "250")]
    pub rpc_base_delay_ms: u64,
    /// Write the full outcome as JSON to this file
    #[clap(long, env)]
    pub json_out: Option<PathBuf>,
    /// Also print every match in the range, not only the player's
    #[clap(long, default_value = "false")]
    pub all_matches: bool,
    #[clap(long, env, default_value = "info")]
    pub log_level: LogLevel,
    /// OTLP/HTTP traces endpoint; spans are only exported when set
    #[clap(long, env)]
    pub otlp_endpoint: Option<Url>,
    /// Sent as the authorization header to the OTLP endpoint
    #[clap(long, env)]
    pub otlp_api_key: Option<String>,
}

impl Env {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            usize::from(self.rpc_attempts),
            Duration::from_millis(self.rpc_base_delay_ms),
        )
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            batch_size: usize::from(self.batch_size),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }

    pub fn lookup_request(&self) -> LookupRequest {
        LookupRequest {
            contract: self.contract,
            player: self.player.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            timezone: self.timezone,
            fetch: self.fetch_config(),
        }
    }
}

fn default_filter(log_level: &LogLevel) -> String {
    let level: Level = log_level.into();
    format!("arena_record={level}")
}

/// Installs the global subscriber. Logs go to stderr so the report on stdout
/// stays clean. Returns a guard to keep alive while spans are being exported.
pub fn setup_tracing(env: &Env) -> Option<TelemetryGuard> {
    let default_filter = default_filter(&env.log_level);

    if let Some(endpoint) = &env.otlp_endpoint {
        match setup_telemetry(endpoint, env.otlp_api_key.clone(), &default_filter) {
            Ok(guard) => return Some(guard),
            Err(e) => eprintln!("Failed to set up OTLP export: {e}, falling back to console logging"),
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .try_init();

    None
}
