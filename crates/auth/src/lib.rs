//! `shopledger-auth`: bearer-token validation and tenant-scoped authorization.
//!
//! This crate is decoupled from HTTP and storage. Tokens are validated here
//! (never issued), and role → permission resolution comes from a `RolePolicy`.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, AuthzError, Principal};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use policy::{PolicyError, RolePolicy};
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
