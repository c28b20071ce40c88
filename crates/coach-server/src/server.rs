use std::io;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use crate::config::ServerConfig;
use crate::handlers;
use crate::state::AppState;

pub async fn run_server(config: ServerConfig) -> io::Result<()> {
    let port = config.port;
    log::info!("initializing coach-server on port {port}");
    let state = web::Data::new(AppState::new(config));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .service(
                web::scope("/api/v1")
                    .route("/coach/analyze", web::post().to(handlers::analyze::handler))
                    .route("/health", web::get().to(handlers::health::handler))
                    .route("/metrics/summary", web::get().to(handlers::metrics::summary)),
            )
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
