//! nodecounter CLI: page complexity annotation for content repositories.
//!
//! Counts the descendant nodes of every page under a root, classifies each
//! page into a complexity tier, and stores the result on the page.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
