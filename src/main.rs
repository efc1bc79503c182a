use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use socialnet::api::{self, AppState};
use socialnet::auth::AuthService;
use socialnet::config::Config;
use socialnet::store::Store;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // Initialize store
    let store = Arc::new(Store::new(&config.database_path).map_err(|e| {
        log::error!("Failed to initialize database {}: {}", config.database_path, e);
        io::Error::new(io::ErrorKind::Other, e)
    })?);

    match store.count_users() {
        Ok(count) => log::info!("Database: {} ({} users)", config.database_path, count),
        Err(e) => log::warn!("Database: {} (could not count users: {})", config.database_path, e),
    }

    // Initialize auth service
    let auth_service = Arc::new(AuthService::new(config.jwt_secret.clone(), store.clone()));

    let state = web::Data::new(AppState::new(store.clone(), auth_service.clone()));

    log::info!(
        "Starting socialnet server on port {} with {} worker(s)",
        config.port,
        config.workers
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            // AuthService is registered on its own for the AuthUser extractor
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(state.clone())
            .configure(api::configure_routes)
    })
    .workers(config.workers)
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
