use broker::{RateLimiter, StreamProducer, WorkQueue};
use common::api::{self, ApiState};
use common::config::Config;
use common::logging::LoggerConfig;
use fetcher::analytics::Analytics;
use fetcher::client::{HttpWeatherClient, WeatherFetcher, UPSTREAM_BASE};
use fetcher::mock::MockWeatherClient;
use fetcher::probe::UpstreamProbe;
use fetcher::scheduler::Scheduler;
use fetcher::worker::WorkerPool;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("fetcher startup failed: {e}");
        eprintln!("fetcher startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> errors::Result<()> {
    let config = Config::from_env()?;
    let _ = LoggerConfig::for_app("fetcher").init();
    let prometheus = api::install_recorder();

    info!(
        "Fetcher starting (mock={}, workers={})",
        config.use_mock,
        fetcher::WORKER_COUNT
    );

    let locations = common::catalog::load()?;

    let pool = broker::create_pool(&config.redis_url)?;
    broker::ping(&pool).await?;

    let queue = WorkQueue::new(pool.clone());
    let limiter = RateLimiter::new(pool.clone());
    let producer = StreamProducer::new(pool.clone());
    let analytics = Arc::new(Analytics::new());

    let weather: Arc<dyn WeatherFetcher> = if config.use_mock {
        Arc::new(MockWeatherClient::new())
    } else {
        Arc::new(HttpWeatherClient::new(fetcher::WORKER_COUNT)?)
    };

    let api_state = ApiState {
        prometheus,
        probe: Arc::new(UpstreamProbe::new(UPSTREAM_BASE, config.use_mock)),
    };
    let api_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, api_state).await {
            error!("API listener failed: {e}");
        }
    });

    let (shutdown_tx, _) = broadcast::channel(1);

    let reporter = tokio::spawn(
        Arc::clone(&analytics).run_reporter(shutdown_tx.subscribe()),
    );

    let scheduler = Scheduler::new(queue.clone(), Arc::clone(&analytics), locations);
    let scheduler_task = {
        let rx = shutdown_tx.subscribe();
        tokio::spawn(scheduler.run(rx))
    };

    let workers = WorkerPool::new(queue, limiter, producer, weather, analytics)
        .spawn(fetcher::WORKER_COUNT, &shutdown_tx);

    wait_for_signal().await;
    info!("Shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());

    for handle in workers {
        let _ = handle.await;
    }
    let _ = scheduler_task.await;
    let _ = reporter.await;

    info!("Fetcher shut down cleanly");
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
