//! Audio codec implementations.
//!
//! - `opus`: Opus audio codec (RFC 6716)

pub mod opus;
