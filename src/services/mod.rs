//! Domain services used by the websocket routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own raid rules, scoring, catalog lookups, and account
//! persistence so route handlers stay focused on frame translation.

pub mod account;
pub mod catalog;
pub mod raid;
pub mod scoring;
