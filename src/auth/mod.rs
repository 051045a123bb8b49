//! Bearer-token verification. Tokens are minted by the account service; this crate only checks
//! them.

pub mod claims;
pub mod extractors;
