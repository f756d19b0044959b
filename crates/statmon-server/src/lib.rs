pub mod access;
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod state;
