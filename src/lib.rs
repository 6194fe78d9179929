pub mod chain;
pub mod config;
pub mod error;
pub mod project;
pub mod record;
pub mod repository;
pub mod service;
pub mod types;
pub mod utils;
