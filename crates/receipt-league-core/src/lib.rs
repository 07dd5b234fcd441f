//! receipt-league-core: Shared types for the league service and its clients
//!
//! This crate contains the competition/receipt vocabulary and input validation
//! that both the service and any client need to agree on.

pub mod errors;
pub mod types;
pub mod validation;

pub use errors::*;
pub use types::*;
pub use validation::*;
