// Library entry point for socialnet
// Exposes modules for testing

pub mod api;
pub mod auth;
pub mod config;
pub mod events;
pub mod models;
pub mod services;
pub mod store;
