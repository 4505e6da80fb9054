//! Access and refresh token handling.

pub mod claims;
pub mod service;

pub use claims::{AccessClaims, RefreshClaims};
pub use service::{IssuedToken, TokenError, TokenService};
