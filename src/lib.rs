// Library exports for testing and the offline-sync binary
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod glossary;
pub mod http;
pub mod language;
pub mod metrics;
pub mod offline;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod translation;
