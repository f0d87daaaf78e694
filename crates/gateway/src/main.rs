#![forbid(unsafe_code)]

mod cli;
mod map_cmd;
mod shutdown;
mod startup;

use anyhow::Result;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("flowgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Command::CheckConfig) => {
            let config = startup::load_config(&cli.config)?;
            println!("{}", serde_json::to_string_pretty(&config.sanitized())?);
            Ok(())
        }
        Some(Command::Map(ref args)) => map_cmd::run(&cli, args).await,
        Some(Command::Serve) | None => startup::run(&cli).await,
    }
}
