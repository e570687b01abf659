#[macro_use]
extern crate lazy_static;

use std::sync::Arc;

use actix_files::{Files, NamedFile};
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    cookie::Key,
    http::{Method, StatusCode},
    middleware,
    web::{self, Data},
    App, Either, HttpResponse, HttpServer, Responder,
};
use log::info;
use sqlx::SqlitePool;
use tera::Tera;

mod api;
mod config;
mod db;
mod errors;
mod guard;
mod routes;
mod session;
mod structs;
#[cfg(test)]
mod testing;
mod utils;
mod views;
mod wizard;
mod workflow;

use api::{ReqwestTransport, Transport};
use config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    db_pool: SqlitePool,
}

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html", ".sql"]);
        tera
    };
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env()?;
    let db_pool = db::connect(&config.drafts_database_url).await?;
    let session_key = Key::from(config.session_key.as_bytes());

    info!("Budget API: {} ({:?})", config.api_base.url(), config.api_base);
    info!(
        "Starting HTTP server on http://{}:{}/",
        config.bind_addr, config.port
    );

    let state = AppState {
        config: config.clone(),
        transport: Arc::new(ReqwestTransport::new()),
        db_pool,
    };

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_secure(state.config.cookie_secure)
                    .build(),
            )
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "static"))
            .app_data(Data::new(state.clone()))
            .configure(routes::configure)
            .default_service(web::to(default_handler))
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}

async fn default_handler(req_method: Method) -> Result<impl Responder, std::io::Error> {
    match req_method {
        Method::GET => {
            let file = NamedFile::open("static/404.html")?
                .customize()
                .with_status(StatusCode::NOT_FOUND);
            Ok(Either::Left(file))
        }
        _ => Ok(Either::Right(HttpResponse::MethodNotAllowed().finish())),
    }
}
