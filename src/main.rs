//! Admission Guard Service
//!
//! This is the main entry point for the admission guard service.
//! It initializes the shared engine and starts the web server.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use admission_guard::api::{self, ApiState};
use admission_guard::config::{build_rules, load_config};
use admission_guard::core::{run_sweeper, RateLimiter};
use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting admission guard...");

    let config = load_config().context("Failed to load configuration")?;
    let config = Arc::new(config);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder not installed: {}", e);
            None
        }
    };

    let rules = build_rules(&config.rule_config).context("Failed to load rules")?;
    let rate_limiter = Arc::new(RateLimiter::new(rules, config.ddos_detection.clone()));

    if config.rate_limit.sweep_interval_ms > 0 {
        let period = Duration::from_millis(config.rate_limit.sweep_interval_ms);
        actix_rt::spawn(run_sweeper(rate_limiter.clone(), period));
    }

    let state = web::Data::new(ApiState {
        rate_limiter,
        config: config.clone(),
        metrics,
    });

    info!("Listening on {}:{}", config.server.host, config.server.port);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    Ok(())
}
