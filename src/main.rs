use anyhow::{Context as _, Result, anyhow};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use eveapi::{Cli, ConfigManager, ConnectionBuilder};

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "eveapi=debug"
    } else {
        "eveapi=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config = ConfigManager::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let config = cli.apply_to(config).map_err(|e| anyhow!(e))?;
    let params = cli.get_params().map_err(|e| anyhow!(e))?;
    debug!(?config, "Effective configuration");

    let mut ctx = ConnectionBuilder::from_config(&config)
        .and_then(ConnectionBuilder::build)
        .context("Failed to set up API connection")?;

    if let (Some(key_id), Some(v_code)) = (cli.key_id, cli.v_code.as_deref()) {
        ctx = ctx.auth(key_id, v_code);
    }
    if let Some(character_id) = cli.character_id {
        ctx = ctx.character(character_id);
    }

    let response = ctx
        .resolve(&cli.path)
        .invoke(params)
        .with_context(|| format!("Call to '{}' failed", cli.path))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
