pub mod error;

pub use error::{GatewayError, Identity, Result};
