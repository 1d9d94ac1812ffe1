mod application;

mod presentation {
    pub mod cli;
}

use clap::Parser;
use shelf_core::error::Result;
use tracing_subscriber::EnvFilter;

use crate::presentation::cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    application::run(Cli::parse()).await
}
