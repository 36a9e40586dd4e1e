mod cli;

use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    ci_tunnel::logging::init(cli.verbose);
    cli::run(cli).await
}
