//! sessionward - Session-backed authentication core
//!
//! This library provides credential hashing and verification plus opaque
//! session token issuance, resolution and revocation over SQLite or MySQL.

pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
