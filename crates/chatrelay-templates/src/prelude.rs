pub use chatrelay_types::error::{CrResult, Error};

pub use tracing::{debug, error, info, warn};

// vim: ts=4
