#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod health;
