//! Authentication contracts
//!
//! Bearer tokens for end users ([`jwt`]) and signed host-to-host requests
//! for upstream integrators ([`h2h`]). Both are consumed by the gateway
//! middleware before a request reaches the dispatch core.

pub mod h2h;
pub mod jwt;

pub use h2h::{H2hHeaders, H2hVerifier};
pub use jwt::{AuthClaims, JwtService};
