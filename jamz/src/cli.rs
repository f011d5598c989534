use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign in through the browser and store the resulting credential
    Login {
        /// Print the sign-in URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Show whether a credential is stored and when it expires
    Status,

    /// Print a valid access token, refreshing it first if needed
    Token,

    /// Refresh the credential if it is near expiry
    Refresh,

    /// Remove the stored credential
    Logout,
}
