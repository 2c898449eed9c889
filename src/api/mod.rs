//! The `spclient` HTTPS surface: access-point resolution, the bearer/
//! client-token authenticated API client, and the Mercury-backed token
//! provider.

pub mod client;
pub mod resolver;
pub mod token;

pub use client::{ApiClient, Metadata};
pub use resolver::ApResolver;
pub use token::TokenProvider;
