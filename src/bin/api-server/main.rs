use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use restaurant_api::{config::Config, db::LazySqliteStore, handler::RestaurantHandler};

mod api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(true)
        .with_file(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;

    // built once, every worker shares the same store client
    let handler = web::Data::new(RestaurantHandler::new(LazySqliteStore::new(
        config.database_url.clone(),
    )));

    tracing::info!("listening on {}", config.bind_addr);
    let cors_origin = config.cors_origin.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allowed_origin(&cors_origin)
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(handler.clone())
            .configure(api::routes::<LazySqliteStore>)
    })
    .bind(config.bind_addr)?
    .run()
    .await?;
    Ok(())
}
