mod session;
mod store;

pub use session::*;
pub use store::*;
