//! Compliance message export.
//!
//! Replays chat history for a time range by `(update_at, id)` cursor,
//! classifies every post into the update taxonomy, partitions records per
//! channel into size-bounded sub-batches, renders one `.eml` per sub-batch
//! into a zip, and either stores the zip on the export backend or delivers
//! each contained email over SMTP with connection recycling.

pub mod classify;
pub mod deliver;
pub mod emit;
pub mod job;
pub mod metadata;

mod prelude;

pub use classify::{classify, export_records, PostExport, UpdatedType, UserType};
pub use deliver::{deliver_zip, DeliveryStats};
pub use emit::{ChannelExport, Emitter, Participant};
pub use job::{JobData, MessageExportJob};
pub use metadata::{ChannelMetadataCache, JoinEvent, LeaveEvent, PostAuthor};

// vim: ts=4
