use std::sync::Arc;

use anyhow::Result;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use foodhub_orderservice::{
    api::payments::HttpPaymentGateway,
    app_state::AppState,
    bootstrap, config, consumers, db, events, outbox,
    push::amqp::AmqpBus,
    routes,
    store::PgStore,
    swagger,
};
use tokio_util::sync::CancellationToken;

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_env();
    bootstrap::init_tracing();

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    let store = Arc::new(PgStore::new(db::create_pool(&config.database.url).await?));
    let gateway = Arc::new(HttpPaymentGateway::new(
        reqwest::Client::new(),
        config.payment_gateway.url.clone(),
    ));
    let mut state = AppState::new(store.clone(), gateway)
        .with_fees(config.fees.clone())
        .with_polling(config.polling.clone());

    let token = CancellationToken::new();
    let bus = match &config.amqp {
        Some(amqp) => {
            let bus = Arc::new(AmqpBus::connect(&amqp.url, &amqp.exchange).await?);
            state = state.with_publisher(bus.clone());
            Some(bus)
        }
        None => {
            tracing::warn!("AMQP_URL not set; outbox events stay queued and consumers are off");
            None
        }
    };

    if let Some(bus) = &bus {
        tracing::info!("Bootstrapping consumers...");
        bootstrap::start_consumers(
            bus,
            Arc::new(state.clone()),
            &[(events::PAYMENT_CONFIRMED, consumers::payments::payment_confirmed)],
        )
        .await?;
        tokio::spawn(outbox::relay(
            store.clone(),
            bus.clone(),
            config.polling.outbox_relay,
            token.child_token(),
        ));
    }

    let swagger_ui = swagger::create_swagger_ui(routes::routes_with_openapi().get_openapi().clone());
    let app = routes::app(state).merge(swagger_ui);

    bootstrap::serve("OrderService", app, config.server.port, token).await
}
