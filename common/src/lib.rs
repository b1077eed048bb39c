//! Strongbox Common Types
//!
//! Shared types used across the Strongbox ledger: account and record
//! identifiers, validated monetary amounts and request validation errors.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod page;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use page::*;
