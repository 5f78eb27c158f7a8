use std::error::Error;
use std::sync::Arc;

use tokio::net::TcpListener;

use mafia_server::config::Config;
use mafia_server::registry::SessionRegistry;
use mafia_server::rpc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting the mafia session server");

    let config = Config::from_env();
    let listener = TcpListener::bind(&config.listen_addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    let registry = Arc::new(SessionRegistry::new(config));

    let maintenance = registry.clone();
    tokio::spawn(async move {
        if let Err(err) = maintenance.run_maintenance().await {
            log::error!("maintenance loop aborted: {}", err);
            std::process::exit(1);
        }
    });

    rpc::server::serve(listener, registry).await?;
    Ok(())
}
