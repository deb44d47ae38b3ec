//! Cost/quality provider routing over registry candidates.

pub mod router;

pub use router::{Preference, Router, RoutingRequest};
