pub mod auth;
pub mod counselor;
pub mod coupons;
pub mod gatekeeper;
pub mod profiles;
pub mod reports;
pub mod webhook;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::rate_limit;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let limiter = rate_limit::per_minute(20);
    rate_limit::spawn_pruner(limiter.clone());

    // Credential and coupon endpoints sit behind the per-IP limiter.
    let limited = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/magic-link", post(auth::magic_link))
        .route("/validate-coupon", post(coupons::redeem))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::limit));

    let api = Router::new()
        .merge(limited)
        .route("/auth/logout", post(auth::logout))
        .route("/gate/check", get(gatekeeper::check))
        .route("/gate/landing", get(gatekeeper::landing))
        .route("/profiles/me", get(profiles::me))
        .route("/profiles/role", post(profiles::select_role))
        .route("/profiles/phone", post(profiles::set_phone))
        .route("/admin/mark-paid", post(profiles::mark_paid))
        .route("/test-coupon", get(coupons::check))
        .route("/razorpay-webhook", post(webhook::razorpay))
        .route("/upload-report", post(reports::upload))
        .route("/reports/me", get(reports::mine))
        .route("/counselor/onboarding", post(counselor::onboard))
        .route("/counselor/students", get(counselor::students))
        .route(
            "/counselor/sessions",
            get(counselor::sessions).post(counselor::create_session),
        )
        .route(
            "/counselor/sessions/{id}/status",
            post(counselor::update_session_status),
        )
        .route("/counselor/reports", get(counselor::reports));

    // Page navigation goes through the gate; API and uploads do not (API
    // handlers do their own session checks).
    let pages = Router::new()
        .fallback_service(
            ServeDir::new(&state.config.static_dir)
                .not_found_service(ServeFile::new(state.config.static_dir.join("index.html"))),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gatekeeper::enforce,
        ));

    Router::new()
        .route("/auth/callback", get(auth::callback))
        .nest("/api", api)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .merge(pages)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
