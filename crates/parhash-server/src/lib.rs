#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{config::ServerConfig, runner::Server, service::handler::ParHashService};
