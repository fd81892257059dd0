use clap::Parser;
use log;

use precision::{server, PrecisionResult, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> PrecisionResult<()> {
    // Initialize logger
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = ServerConfig::parse();
    log::info!("Starting Precision server v{} with {:?}", VERSION, config);

    server::run(config).await
}
