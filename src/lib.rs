//! # MedMarkt Backend Library
//!
//! This is the core library for MedMarkt, a multi-tenant pharmacy marketplace
//! backend. MedMarkt connects customers with local pharmacies: catalog
//! browsing, search, shopping carts, cash-on-delivery orders, and an admin
//! surface for pharmacy verification and platform oversight.
//!
//! ## Architecture
//!
//! The application is built using:
//! - **Axum**: Modern web framework for HTTP server and routing
//! - **SQLx**: Asynchronous database operations with SQLite
//! - **Tokio**: Async runtime for concurrent operations
//! - **Serde**: Serialization/deserialization for JSON APIs
//!
//! ## Core Components
//!
//! - [`auth`]: Password hashing and JWT issuing/verification
//! - [`audit`]: Fire-and-forget audit trail writes
//! - [`config`]: Application configuration management
//! - [`db`]: Database schema initialization and seed data
//! - [`error`]: Centralized error handling and HTTP error responses
//! - [`mail`]: Transactional mail (verification, reset, order confirmation)
//! - [`metrics`]: Application performance and usage metrics
//! - [`middleware`]: HTTP middleware for security, rate limiting, and validation
//! - [`routes`]: HTTP API endpoint handlers
//! - [`state`]: Shared application state and resource management
//! - [`types`]: Data transfer objects and shared type definitions

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mail;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
