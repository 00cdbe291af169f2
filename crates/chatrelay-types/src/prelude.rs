pub use crate::error::{CrResult, Error};
pub use crate::types::{Clock, SystemClock, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
