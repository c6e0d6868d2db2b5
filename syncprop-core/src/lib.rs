mod item;
mod paths;
mod pin;
mod record;
mod status;

pub use item::{Instruction, ItemType, ModelError, SyncItem};
pub use paths::{
    PathError, eq_ignore_case, file_name, is_descendant_of, join_relative, parent_path,
    validate_relative,
};
pub use pin::{Availability, PinState};
pub use record::{FileRecord, MetadataPhase, PROVISIONAL_ETAG};
pub use status::JobStatus;
