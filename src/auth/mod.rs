//! # Auth Module
//!
//! This module handles all authentication-related functionality including:
//! - Email/password registration, login, verification and password reset
//! - Access/refresh token issuance and strict refresh rotation
//! - Social login (Google, Facebook, Apple) with account linking
//! - Unique username allocation
//! - AuthedUser extractor for protected routes

pub mod extractors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;
pub mod social;
pub mod tokens;
pub mod username;

#[cfg(test)]
mod tests;

pub use extractors::AuthedUser;
pub use models::User;
pub use routes::auth_routes;
pub use service::AuthService;
