pub mod app;
pub mod auth;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod dates;
pub mod download;
pub mod error;
pub mod layout;
pub mod output;
pub mod progress;
pub mod query;
pub mod resolver;
pub mod tui;
pub mod version;
