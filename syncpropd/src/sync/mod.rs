pub mod clash;
pub mod conflict;
pub mod filesystem;
pub mod journal;
pub mod vfs;
