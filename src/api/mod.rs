//! API endpoints for the admission guard.
//!
//! This module exposes the engine over HTTP: admission checks for request
//! handlers, plus the operator surface for rules, blocks and statistics.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{DdosDetectionConfig, RateLimiter, Rule};
use crate::models::{Config, RateLimitConfig};

pub struct ApiState {
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<Config>,
    /// Absent when no recorder was installed
    pub metrics: Option<PrometheusHandle>,
}

/// Errors returned by the HTTP surface
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("Rule not found: {0}")]
    RuleNotFound(String),
    #[error("No limit state for {identity} on {action}")]
    LimitStateNotFound { identity: String, action: String },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::EmptyField(_) => StatusCode::BAD_REQUEST,
            ApiError::RuleNotFound(_) | ApiError::LimitStateNotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        Err(ApiError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/limits/check").route(web::post().to(check_rate_limit)))
            .service(web::resource("/limits/record").route(web::post().to(record_request)))
            .service(
                web::resource("/limits")
                    .route(web::get().to(get_status))
                    .route(web::delete().to(reset_limits)),
            )
            .service(web::resource("/limits/state").route(web::get().to(get_user_limit_state)))
            .service(
                web::resource("/rules")
                    .route(web::get().to(get_rules))
                    .route(web::post().to(add_rule)),
            )
            .service(
                web::resource("/rules/{name}")
                    .route(web::get().to(get_rule))
                    .route(web::delete().to(remove_rule)),
            )
            .service(
                web::resource("/blocks")
                    .route(web::get().to(get_blocked_users))
                    .route(web::post().to(block_user))
                    .route(web::delete().to(unblock_user)),
            )
            .service(
                web::resource("/ddos")
                    .route(web::get().to(get_ddos_info))
                    .route(web::put().to(set_ddos_threshold)),
            )
            .service(web::resource("/stats").route(web::get().to(get_security_stats)))
            .service(web::resource("/stats/reset").route(web::post().to(reset_statistics)))
            .service(web::resource("/users/active").route(web::get().to(get_active_users)))
            .service(web::resource("/clear").route(web::post().to(clear)))
            .service(web::resource("/metrics").route(web::get().to(render_metrics))),
    );
}

/// Health check endpoint response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse<'a> {
    status: String,
    version: String,
    rate_limit: &'a RateLimitConfig,
    ddos_detection: &'a DdosDetectionConfig,
}

/// Identity and action of a guarded request
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitRequest {
    pub identity: String,
    pub action: String,
}

/// Operator block request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub identity: String,
    pub duration_ms: u64,
}

/// Identities travel in the query string so any character survives
/// percent-encoding, '/' included.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityQuery {
    pub identity: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LimitStateQuery {
    pub identity: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: u64,
}

#[derive(Serialize)]
struct RemovedResponse {
    removed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveUsersResponse {
    active_users: usize,
}

/// Health check endpoint, echoing the limiter settings in effect
async fn health_check(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rate_limit: &state.config.rate_limit,
        ddos_detection: &state.config.ddos_detection,
    })
}

/// Rate limit check endpoint
pub async fn check_rate_limit(
    state: web::Data<ApiState>,
    req: web::Json<RateLimitRequest>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &req.identity)?;
    require("action", &req.action)?;

    let status = state.rate_limiter.check_limit(&req.identity, &req.action);
    Ok(HttpResponse::Ok().json(status))
}

async fn record_request(
    state: web::Data<ApiState>,
    req: web::Json<RateLimitRequest>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &req.identity)?;
    require("action", &req.action)?;

    state.rate_limiter.record_request(&req.identity, &req.action);
    Ok(HttpResponse::NoContent().finish())
}

async fn get_status(
    state: web::Data<ApiState>,
    query: web::Query<IdentityQuery>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &query.identity)?;

    Ok(HttpResponse::Ok().json(state.rate_limiter.get_status(&query.identity)))
}

async fn get_user_limit_state(
    state: web::Data<ApiState>,
    query: web::Query<LimitStateQuery>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &query.identity)?;
    require("action", &query.action)?;

    let LimitStateQuery { identity, action } = query.into_inner();
    state
        .rate_limiter
        .get_user_limit_state(&identity, &action)
        .map(|limit| HttpResponse::Ok().json(limit))
        .ok_or(ApiError::LimitStateNotFound { identity, action })
}

async fn reset_limits(
    state: web::Data<ApiState>,
    query: web::Query<IdentityQuery>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &query.identity)?;

    state.rate_limiter.reset_limits(&query.identity);
    Ok(HttpResponse::NoContent().finish())
}

async fn get_rules(state: web::Data<ApiState>) -> impl Responder {
    let mut rules = state.rate_limiter.get_all_rules();
    rules.sort_by(|a, b| a.name.cmp(&b.name));
    HttpResponse::Ok().json(rules)
}

async fn add_rule(state: web::Data<ApiState>, rule: web::Json<Rule>) -> Result<HttpResponse, ApiError> {
    require("name", &rule.name)?;

    let rule = rule.into_inner();
    state.rate_limiter.add_rule(rule.clone());
    Ok(HttpResponse::Created().json(rule))
}

async fn get_rule(state: web::Data<ApiState>, name: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    state
        .rate_limiter
        .get_rule(&name)
        .map(|rule| HttpResponse::Ok().json(rule))
        .ok_or(ApiError::RuleNotFound(name))
}

async fn remove_rule(state: web::Data<ApiState>, name: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    if state.rate_limiter.remove_rule(&name) {
        Ok(HttpResponse::Ok().json(RemovedResponse { removed: true }))
    } else {
        Err(ApiError::RuleNotFound(name))
    }
}

async fn get_blocked_users(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.rate_limiter.get_blocked_users())
}

async fn block_user(
    state: web::Data<ApiState>,
    req: web::Json<BlockRequest>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &req.identity)?;

    state
        .rate_limiter
        .block_user(&req.identity, Duration::from_millis(req.duration_ms));
    Ok(HttpResponse::NoContent().finish())
}

async fn unblock_user(
    state: web::Data<ApiState>,
    query: web::Query<IdentityQuery>,
) -> Result<HttpResponse, ApiError> {
    require("identity", &query.identity)?;

    state.rate_limiter.unblock_user(&query.identity);
    Ok(HttpResponse::NoContent().finish())
}

async fn get_ddos_info(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.rate_limiter.get_ddos_info())
}

async fn set_ddos_threshold(state: web::Data<ApiState>, req: web::Json<ThresholdRequest>) -> impl Responder {
    state.rate_limiter.set_ddos_threshold(req.threshold);
    HttpResponse::Ok().json(state.rate_limiter.get_ddos_info())
}

async fn get_security_stats(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.rate_limiter.get_security_stats())
}

async fn reset_statistics(state: web::Data<ApiState>) -> impl Responder {
    state.rate_limiter.reset_statistics();
    HttpResponse::NoContent().finish()
}

async fn get_active_users(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(ActiveUsersResponse {
        active_users: state.rate_limiter.get_active_users(),
    })
}

async fn clear(state: web::Data<ApiState>) -> impl Responder {
    state.rate_limiter.clear();
    HttpResponse::NoContent().finish()
}

async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
