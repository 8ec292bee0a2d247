use arena_record::{Env, cli, setup_tracing};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();
    let env = Env::try_parse()?;
    let _telemetry_guard = setup_tracing(&env);

    cli::run(env).await
}
