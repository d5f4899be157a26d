pub mod api;
pub mod error;
pub mod session;

pub use error::{Error, Result};
pub use session::{Peripheral, Subscription};
