use actix_web::{get, middleware::Logger, patch, post, web, App, HttpResponse, HttpServer, Responder};
use log::info;
use serde_json::{Map, Value};
use crate::{config::{Config, JsonFileSettings}, controller::WebhookController};

pub mod config;
pub mod controller;
pub mod error;
pub mod request;
pub mod state;

const SETTINGS_PATH: &str = "psu_webhooks.json";
const SETTINGS_PATH_ENV: &str = "PSU_WEBHOOKS_SETTINGS";

#[cfg(debug_assertions)]
const PORT: u16 = 5568;
#[cfg(not(debug_assertions))]
const PORT: u16 = 5567;

#[cfg(debug_assertions)]
const DEFAULT_LOG: &str = "psu_webhooks=debug,actix_web=debug,actix_server=debug";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG: &str = "info";

struct AppState {
    controller: WebhookController,
    settings: JsonFileSettings,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG)).init();

    // Read settings
    let settings_path = std::env::var(SETTINGS_PATH_ENV).unwrap_or_else(|_| SETTINGS_PATH.to_string());
    let settings = JsonFileSettings::new(&settings_path);
    let controller = WebhookController::new(Config::load(&settings)?)?;
    info!("Loaded settings from {}", settings_path);

    let state = web::Data::new(AppState { controller, settings });

    // Create and start server.
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind(("0.0.0.0", PORT))?
    .run()
    .await?;

    Ok(())
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(turn_psu_on)
        .service(turn_psu_off)
        .service(get_psu_state)
        .service(get_settings)
        .service(patch_settings);
}

#[post("/psu/on")]
async fn turn_psu_on(state: web::Data<AppState>) -> impl Responder {
    state.controller.turn_psu_on().await;
    HttpResponse::NoContent()
}

#[post("/psu/off")]
async fn turn_psu_off(state: web::Data<AppState>) -> impl Responder {
    state.controller.turn_psu_off().await;
    HttpResponse::NoContent()
}

#[get("/psu/state")]
async fn get_psu_state(state: web::Data<AppState>) -> impl Responder {
    let is_on = state.controller.get_psu_state().await;
    web::Json(PsuStateResp { is_on })
}

#[get("/settings")]
async fn get_settings(state: web::Data<AppState>) -> Result<impl Responder, Box<dyn std::error::Error>> {
    let config = state.controller.config().await;
    Ok(web::Json(config.to_document()?))
}

#[patch("/settings")]
async fn patch_settings(state: web::Data<AppState>, new_settings: web::Json<Map<String, Value>>) -> Result<impl Responder, Box<dyn std::error::Error>> {
    state.settings.write(&new_settings)?; // Write settings

    // Swap in the rebuilt config
    let config = state.controller.reload(&state.settings).await?;
    info!("Updated config to {:?}", config);

    Ok(web::Json(config.to_document()?))
}

#[derive(serde::Deserialize, serde::Serialize)]
struct PsuStateResp {
    is_on: bool,
}
