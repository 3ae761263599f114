use flowforge_scheduler::Scheduler;
use flowforge_server::config::ServerConfig;
use flowforge_server::db::PgStore;
use flowforge_server::error::ServerError;
use flowforge_server::routes::{AppState, router};
use flowforge_workflow::credential::PlaintextCipher;
use flowforge_workflow::dispatch::{InlineDispatcher, RunDispatcher};
use flowforge_workflow::executor::{ConditionExecutor, ExecutorRegistry, HttpRequestExecutor};
use flowforge_workflow::nats::{
    self, NatsConfig, NatsRunQueue, NatsStatusPublisher, NatsStepRunnerFactory,
};
use flowforge_workflow::status::{StatusHandle, StatusPublisher, TracingStatusPublisher};
use flowforge_workflow::step::{InMemoryStepRunnerFactory, StepRunnerFactory};
use flowforge_workflow::template::TemplateEngine;
use flowforge_workflow::Engine;
use rootcause::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Messaging-backed collaborators, or their in-process stand-ins.
struct Runtime {
    steps: Arc<dyn StepRunnerFactory>,
    status: Arc<dyn StatusPublisher>,
    queue: Option<NatsRunQueue>,
}

async fn runtime(config: &ServerConfig) -> Result<Runtime, ServerError> {
    let policy = config.engine.retry_policy();
    let Some(url) = &config.nats_url else {
        tracing::warn!("NATS_URL not set, step memos will not survive a restart");
        return Ok(Runtime {
            steps: Arc::new(InMemoryStepRunnerFactory::new(policy)),
            status: Arc::new(TracingStatusPublisher),
            queue: None,
        });
    };

    let messaging = |e: nats::NatsError| ServerError::Messaging {
        details: e.to_string(),
    };
    let nats_config = NatsConfig::new(url.clone());
    let client = nats::connect(&nats_config).await.map_err(messaging)?;
    let jetstream = async_nats::jetstream::new(client.clone());
    let steps = NatsStepRunnerFactory::new(&jetstream, &nats_config, policy)
        .await
        .map_err(messaging)?;
    let queue = NatsRunQueue::new(jetstream, nats_config)
        .await
        .map_err(messaging)?;
    tracing::info!(%url, "connected to NATS");

    Ok(Runtime {
        steps: Arc::new(steps),
        status: Arc::new(NatsStatusPublisher::new(client)),
        queue: Some(queue),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Report<ServerError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().map_err(|e| ServerError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| ServerError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| ServerError::Migration {
            details: e.to_string(),
        })?;

    let store = Arc::new(PgStore::new(db_pool));
    let templates = Arc::new(TemplateEngine::new());
    let http_request = HttpRequestExecutor::new(
        templates.clone(),
        store.clone(),
        Arc::new(PlaintextCipher),
        config.engine.http_timeout(),
    )
    .map_err(|e| ServerError::HttpClient {
        details: e.to_string(),
    })?;
    let registry = ExecutorRegistry::new(ConditionExecutor::new(templates), http_request);

    let runtime = runtime(&config).await?;
    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        registry,
        runtime.steps,
        StatusHandle::new(runtime.status),
    ));

    let max_concurrent_runs = config.engine.max_concurrent_runs;
    let dispatcher: Arc<dyn RunDispatcher> = match runtime.queue {
        Some(queue) => {
            let consumer = queue.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = consumer.consume(engine, max_concurrent_runs).await {
                    tracing::error!(error = %e, "run queue consumer stopped");
                }
            });
            Arc::new(queue)
        }
        None => Arc::new(InlineDispatcher::new(engine, max_concurrent_runs)),
    };

    if config.scheduler.enabled {
        let scheduler = Scheduler::new(store.clone(), dispatcher.clone());
        let interval = config.scheduler.interval();
        tracing::info!(interval_seconds = interval.as_secs(), "starting cron scheduler");
        tokio::spawn(async move { scheduler.run(interval).await });
    }

    let app = router(AppState {
        workflows: store.clone(),
        executions: store,
        dispatcher,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: config.listen_addr.clone(),
            details: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", config.listen_addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Serve {
            details: e.to_string(),
        })?;
    Ok(())
}
