//! Maestro CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use maestro::cli::{commands, ApiClient, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(args).await,
        command => {
            // Client commands only need warnings; `serve` installs its own subscriber.
            tracing_subscriber::registry()
                .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            let client = ApiClient::new(&cli.server);
            commands::workflow::execute(command, &client, cli.json).await
        }
    };

    if let Err(err) = result {
        maestro::cli::handle_error(err, cli.json);
    }
}
