//! Data attachment terms.
//!
//! A data term scores how far the final image of a shooting is from the
//! target. Lower is better and every shipped term is non-negative.

pub mod ncc;
pub mod ssd;
pub mod trait_;

pub use ncc::Ncc;
pub use ssd::{NormalizedSsd, Ssd};
pub use trait_::DataTerm;
