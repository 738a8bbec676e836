//! HTTP route handlers for the MedMarkt API.
//!
//! This module contains all the HTTP endpoint handlers for the pharmacy
//! marketplace. Each sub-module handles a specific domain of functionality:
//!
//! - `admin`: Dashboard, user management, pharmacy verification, settings, audit log
//! - `auth`: Registration, login, email verification, token refresh, password reset
//! - `cart`: Shopping cart grouped by pharmacy
//! - `health`: Health check and system status endpoints
//! - `orders`: Order placement, tracking, status transitions, cancellation
//! - `pharmacies`: Public pharmacy listing and the seller's own pharmacy/inventory
//! - `products`: Public product catalog and categories
//! - `search`: Product and pharmacy search plus suggestions
//! - `users`: Profile and delivery addresses

pub mod admin;
pub mod auth;
pub mod cart;
pub mod health;
pub mod orders;
pub mod pharmacies;
pub mod products;
pub mod search;
pub mod users;
