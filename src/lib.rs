//! Order lifecycle and delivery dispatch for a multi-restaurant food
//! delivery platform.

pub mod api;
pub mod app_error;
pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod consumers;
pub mod db;
pub mod events;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod outbox;
pub mod push;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
pub mod swagger;
