pub mod bindings;
pub mod cancel;
pub mod cli;
pub mod env;
pub mod error;
pub mod lookup;
pub mod onchain;
pub mod record;
pub mod rpc;
mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

pub use bindings::GameResult;
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use env::{Env, LogLevel, setup_tracing};
pub use error::{DecodeMismatch, LookupError, NetworkError, RpcError};
pub use lookup::{LookupOutcome, LookupRequest, run_lookup};
pub use onchain::backfill::FetchConfig;
pub use onchain::blocks::{BlockRange, BlockRef};
pub use record::{MatchRecord, MatchResult, PlayerMatchView, PlayerStats};
pub use rpc::{HttpTransport, RetryPolicy, RpcClient, Transport};
pub use telemetry::TelemetryGuard;
