// Authenticated request pipeline - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod remote;

pub use error::{ApiError, AuthFailure};
pub use http_client::{ApiRequest, ApiResponse, AuthenticatedClient};
