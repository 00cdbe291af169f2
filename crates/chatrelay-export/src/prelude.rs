pub use chatrelay_types::error::{CrResult, Error};
pub use chatrelay_types::types::Timestamp;

pub use tracing::{debug, error, info, warn};

// vim: ts=4
