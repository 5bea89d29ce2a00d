//! OAuth credential plumbing for the rotation engine
//!
//! Provides the account record, token refresh against the provider token
//! endpoint, unverified JWT claims extraction, and the on-disk account store.
//! This crate is a standalone library with no dependency on the pool engine,
//! so it can be tested and used independently.
//!
//! Credential flow:
//! 1. Host obtains a credential pair out of band (authorization flow is not
//!    this crate's concern) and hands it to the pool
//! 2. Pool persists the account list via [`AccountStore::save`]
//! 3. Before each request the pool calls [`token::refresh`] when the access
//!    token is near expiry
//! 4. [`claims::decode`] supplies the identity label and routing identifier

pub mod account;
pub mod claims;
pub mod constants;
pub mod error;
pub mod store;
pub mod token;

pub use account::{Account, CredentialPair};
pub use claims::{Claims, decode as decode_claims};
pub use constants::*;
pub use error::{Error, Result};
pub use store::{AccountStore, SCHEMA_VERSION, StoredPool};
pub use token::{TokenResponse, refresh};
