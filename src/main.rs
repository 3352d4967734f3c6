use lsp_session::cli::Cli;
use lsp_session::{app, telemetry};
use tracing::error;

#[tokio::main]
async fn main() {
    let config = Cli::from_args().into_config();
    if let Err(e) = telemetry::init(&config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // exit explicitly: a pending blocking stdin read would keep the runtime alive
    match app::run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "server failed");
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
