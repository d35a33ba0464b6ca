// Library exports for Khyati
// This allows integration tests and external code to use Khyati modules

pub mod auth;
pub mod comments;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;
