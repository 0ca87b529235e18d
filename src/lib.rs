//! ClassMent platform backend.
//!
//! Onboarding, role selection, payment/coupon gating, report handling, and
//! counselor dashboards. The access policy lives in [`gate`] as one pure
//! function; everything else is adapters, handlers, and storage.

pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod gate;
pub mod rate_limit;
pub mod routes;
pub mod state;
