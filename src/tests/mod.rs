//! Integration and unit tests for the MedMarkt backend.
//!
//! This module organizes all test modules for the application, providing
//! comprehensive test coverage for different components and functionality.
//!
//! ## Test Modules
//!
//! - **api_tests**: General API endpoint tests (health, metrics, public data)
//! - **auth_api_tests**: Registration, verification, login and password reset tests
//! - **order_api_tests**: Cart and order lifecycle tests
//! - **admin_api_tests**: Admin oversight, settings and audit log tests
//! - **error_tests**: Error handling and response envelope tests
//! - **config_tests**: Configuration loading and validation tests
//! - **db_tests**: Database schema and seed tests
//!
//! ## Running Tests
//!
//! Tests can be run using:
//! ```bash
//! cargo test
//! ```
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test auth_api_tests
//! cargo test order_api_tests
//! # etc.
//! ```

pub mod helpers;

pub mod api_tests;
pub mod admin_api_tests;
pub mod config_tests;
pub mod db_tests;
