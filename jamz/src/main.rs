use anyhow::{Context, Result};
use clap::Parser;

use jamz::cli::Cli;
use jamz::{commands, logging};
use jamz_auth::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let (log_path, _guard) = logging::init_logging()?;
    tracing::info!(log = %log_path.display(), command = ?cli.command, "jamz starting");

    let settings = Settings::new().context(
        "Failed to load configuration. Create a config.toml with an [oauth] section \
         (client_id, client_secret, redirect_uri) or set JAMZ__OAUTH__* variables",
    )?;

    commands::run(cli.command, &settings).await
}
