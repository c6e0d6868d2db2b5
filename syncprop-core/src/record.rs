use serde::{Deserialize, Serialize};

use crate::item::{ItemType, SyncItem};

/// Etag of a directory record written before its contents were propagated.
pub const PROVISIONAL_ETAG: &str = "_invalid_";

/// Directory metadata is written twice: a provisional record as soon as the
/// directory exists, and the final one once everything below it is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataPhase {
    Provisional,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub item_type: ItemType,
    pub size: i64,
    pub modtime: i64,
    pub etag: String,
    pub file_id: Option<String>,
    pub checksum_header: Option<String>,
}

impl FileRecord {
    pub fn from_item(item: &SyncItem, phase: MetadataPhase) -> Self {
        let etag = match phase {
            MetadataPhase::Provisional => PROVISIONAL_ETAG.to_string(),
            MetadataPhase::Final => item.etag.clone(),
        };
        Self {
            path: item.destination().to_string(),
            item_type: item.item_type,
            size: item.size,
            modtime: item.modtime,
            etag,
            file_id: item.file_id.clone(),
            checksum_header: item.checksum_header.clone(),
        }
    }

    pub fn is_virtual_file(&self) -> bool {
        self.item_type == ItemType::VirtualFile
    }

    pub fn is_directory(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    pub fn is_provisional(&self) -> bool {
        self.etag == PROVISIONAL_ETAG
    }
}
