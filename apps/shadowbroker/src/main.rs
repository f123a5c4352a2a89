use anyhow::Result;
use shadowbroker::{logging, Broker, Config, Server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load_default()?;
    let _guard = logging::init(&cfg.log);
    cfg.validate()?;

    info!(
        addr = %cfg.listen_addr(),
        upstreams = ?cfg.upstreams.keys().collect::<Vec<_>>(),
        direct = ?cfg.direct_labels,
        rules = cfg.routing.rules.len(),
        default_route = %cfg.routing.default,
        "config loaded"
    );

    let broker = Broker::from_config(cfg);
    let server = Server::bind(broker).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
