use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use liveboard::api::{self, ApiDoc, AppState};
use liveboard::config::Config;
use liveboard::import;
use liveboard::realtime::{self, queue::event_queue, RealtimeContext};
use liveboard::store::Store;
use liveboard::transforms::Transformer;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liveboard=debug,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var("LIVEBOARD_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path).expect("Failed to load config");
    config.validate();
    let timezone = config.parsed_timezone();
    info!(
        datasets = config.datasets.len(),
        timezone = %config.timezone,
        "Loaded configuration"
    );

    let store = Store::connect(&config.database_path)
        .await
        .expect("Failed to open document store");

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .build()
        .expect("Failed to build HTTP client");

    // Realtime pipeline: queue, shared context, consumer pool.
    let (queue, receiver) = event_queue(config.realtime.queue_capacity);
    let context = Arc::new(RealtimeContext::new(
        store.clone(),
        timezone,
        config.realtime.journey_cache_capacity,
        config.realtime.journey_cache_ttl(),
    ));
    let _workers = realtime::start_consumers(context, receiver, config.realtime.consumer_count);

    // Background feeders.
    let config = Arc::new(config);
    tokio::spawn(import::run_reference_import_loop(
        store.clone(),
        client.clone(),
        queue.clone(),
        config.clone(),
    ));
    tokio::spawn(import::run_realtime_feed_loop(
        store.clone(),
        client,
        queue.clone(),
        config.clone(),
    ));

    let state = AppState {
        store,
        timezone,
        active_cutoff: config.realtime.active_cutoff(),
        default_board_count: config.board.default_count,
        transformer: Arc::new(Transformer::new(config.transforms.clone())),
        queue,
    };

    let cors = CorsLayer::new().allow_origin(Any);
    let app = api::router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .expect("Failed to bind listen address");
    info!(listen = %config.listen, "Serving API");

    axum::serve(listener, app).await.expect("Server error");
}
