//! HTTP routes for the token signing service.
//!
//! - `health`: Health check and build info
//! - `sign`: Payload signing and the public verification key

pub mod health;
pub mod sign;

pub use health::{build_info, health};
pub use sign::{public_key, sign};
