use codemend_common::{tracing_setup, SystemConfig};
use codemend_orchestrator::Services;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_setup::init_tracing();

    let config = match std::env::var("CODEMEND_CONFIG") {
        Ok(path) => SystemConfig::load(&path)?,
        Err(_) => {
            let mut config = SystemConfig::default();
            config.apply_env();
            config
        }
    };

    let services = Arc::new(Services::initialize(config).await?);
    codemend_api::run_server(services).await?;
    Ok(())
}
