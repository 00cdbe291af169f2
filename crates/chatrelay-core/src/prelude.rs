pub use chatrelay_types::error::{CrResult, Error};
pub use chatrelay_types::types::{Clock, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
