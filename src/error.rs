//! Crate-level error re-exports. Fallible operations live only at structured
//! boundaries (wire decode, configuration validation); everything else
//! reports success/failure as a plain `bool` or snapshot per the "never
//! throws" propagation rule.

pub use crate::config::ConfigError;
pub use crate::protocol::wire::WireError;
