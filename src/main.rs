#[macro_use]
extern crate rocket;

mod article;
mod auth;
mod comment;
mod config;
mod db;
mod guard;
mod profile;
mod types;
mod users;
mod utils;


use rocket::http::Status;
use rocket::request::Request;
use rocket::serde::json::{json, Value};
use rocket::{Build, Rocket};
use tracing_subscriber::EnvFilter;

use crate::auth::TokenService;
use crate::config::Config;

#[catch(422)]
fn unprocessable(_req: &Request) -> Value {
    json!({ "errors": { "body": ["could not be processed"] } })
}

#[catch(404)]
fn not_found(_req: &Request) -> Value {
    json!({ "errors": { "entity": ["not found"] } })
}

#[catch(401)]
fn unauthorized(_req: &Request) -> Value {
    json!({ "errors": { "token": ["missing or invalid"] } })
}

#[catch(default)]
fn fallback(status: Status, _req: &Request) -> Value {
    json!({ "errors": { "server": [status.reason_lossy()] } })
}

#[get("/ping")]
fn ping() -> &'static str {
    "pong"
}

pub fn build(config: &Config, pool: db::Pool) -> Rocket<Build> {
    rocket::build()
        .manage(pool)
        .manage(TokenService::new(config.signature.as_bytes()))
        .mount("/api", routes![ping])
        .mount("/api", users::routes())
        .mount("/api", profile::routes())
        .mount("/api", article::routes())
        .mount("/api", comment::routes())
        .register("/", catchers![unprocessable, not_found, unauthorized, fallback])
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(config = ?config, "starting");
    let pool = db::init_pool(&config).expect("Failed to create database pool");

    if let Err(e) = rocket::execute(build(&config, pool).launch()) {
        tracing::error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
