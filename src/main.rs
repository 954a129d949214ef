use tracing::info;

use primacron::gateway::config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("primacron realtime messaging gateway");

    let config = GatewayConfig::from_env();
    primacron::gateway::server::run(config).await
}
