//! World-definition catalog for Duskfall.
//!
//! Holds the identifier model, the authored record types, the shared
//! [`store::ContentStore`] catalog, and the tagged save-stream codec. Runtime
//! chunk state lives in the `duskfall-world` crate; this one never mutates
//! after loading except to append synthesized grid-chunk definitions.

pub mod ids;
pub mod records;
pub mod save;
pub mod store;
