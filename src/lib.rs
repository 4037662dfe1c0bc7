//! WiFi voucher sales backend.
//!
//! Payments are collected through MarzPay mobile money. Confirmation is
//! reconciled by two racing paths (client status polls and a cron-driven
//! worker) that converge on an idempotent voucher assignment.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
