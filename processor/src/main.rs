use broker::StreamConsumer;
use common::api::{self, ApiState};
use common::config::{Config, InfluxConfig};
use common::logging::LoggerConfig;
use log::{error, info};
use processor::consumer::Consumer;
use processor::probe::BrokerProbe;
use processor::writer::{spawn_writer, InfluxSink};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("processor startup failed: {e}");
        eprintln!("processor startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> errors::Result<()> {
    let config = Config::from_env()?;
    let influx_config = InfluxConfig::from_env()?;
    let _ = LoggerConfig::for_app("processor").init();
    let prometheus = api::install_recorder();

    info!("Processor starting as consumer {}", processor::CONSUMER_NAME);

    let pool = broker::create_pool(&config.redis_url)?;
    broker::ping(&pool).await?;

    let stream = StreamConsumer::new(pool.clone(), processor::CONSUMER_NAME);
    stream.ensure_group().await?;

    let api_state = ApiState {
        prometheus,
        probe: Arc::new(BrokerProbe::new(pool.clone())),
    };
    let api_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, api_state).await {
            error!("API listener failed: {e}");
        }
    });

    let sink = Arc::new(InfluxSink::new(&influx_config));
    let (writer, writer_task) = spawn_writer(sink);

    let (shutdown_tx, _) = broadcast::channel(1);
    let consumer_task = {
        let consumer = Consumer::new(stream, writer.clone());
        let rx = shutdown_tx.subscribe();
        tokio::spawn(consumer.run(rx))
    };

    wait_for_signal().await;
    info!("Shutdown signal received, flushing writer");
    let _ = shutdown_tx.send(());
    let _ = consumer_task.await;

    // Last handle drops here; the flush task drains and exits.
    drop(writer);
    let _ = writer_task.await;

    info!("Processor shut down cleanly");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("SIGTERM handler failed to install: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
