use dotenv::dotenv;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

use retail_dashboard_api::config::Config;
use retail_dashboard_api::{routes, AppState};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    info!("Logger initialized. Starting the application...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!("Will bind to: {}", addr);

    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!("Failed to initialize application state: {}", err);
            std::process::exit(1);
        }
    };

    // Standing queries keep the cache warm independently of request traffic.
    state.queries.spawn_pollers();

    let cors = warp::cors()
        .allow_any_origin()
        .allow_header("content-type")
        .allow_header("authorization")
        .allow_methods(vec!["GET", "POST"]);

    let api = routes::routes(state).with(cors);
    info!("Routes configured successfully with CORS.");

    info!("Starting server on {}", addr);
    warp::serve(api).run(addr).await;
}
