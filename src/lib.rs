pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod quota;
pub mod ratelimit;
pub mod routes;
pub mod services;
pub mod validators;
