//! Shared networking infrastructure.

pub mod chaos;
pub mod client;

pub use chaos::ChaosInjector;
pub use client::{HttpClient, HttpClientBuilder};
