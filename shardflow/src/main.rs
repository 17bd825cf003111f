use std::error::Error;
use std::path::PathBuf;

use shardflow_core::config::Settings;
use tracing::{error, info};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // a missing .env file is fine, a malformed one is not
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        return Err(e.into());
    }
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let settings = Settings::load(std::env::vars())?;

    match matches.subcommand() {
        Some((cmdline::CONSUME, _)) => shardflow_core::consume(&settings).await?,
        Some((cmdline::PRODUCE, _)) => shardflow_core::produce(&settings).await?,
        Some((cmdline::SCHEMA, args)) => {
            let output = args.get_one::<PathBuf>(cmdline::OUTPUT).cloned();
            shardflow_core::print_schema(&settings, output).await?
        }
        Some((other, _)) => return Err(format!("unknown command {other}").into()),
        None => return Err("no command given".into()),
    }

    Ok(())
}
