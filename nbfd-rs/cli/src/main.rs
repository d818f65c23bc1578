use anyhow::{Context, Result};
use runner::Runner;

mod config;
mod report;
mod runner;

fn main() -> Result<()> {
    Runner::new()
        .context("create runner")?
        .run()
        .context("run command")
}
