//! GeoNature sync workspace crate.
//!
//! Re-exports the `core-service` façade so host applications can depend on a
//! single crate and pick the bridge set through features.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
