use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::{PathError, validate_relative};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid item type: {0}")]
    InvalidItemType(String),
    #[error("invalid pin state: {0}")]
    InvalidPinState(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Remove,
    Mkdir,
    Rename,
    /// The local side is replaced after keeping a conflicted copy of what was there.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    #[default]
    File,
    Directory,
    VirtualFile,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Directory => "dir",
            ItemType::VirtualFile => "virtual",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "file" => Ok(ItemType::File),
            "dir" => Ok(ItemType::Directory),
            "virtual" => Ok(ItemType::VirtualFile),
            other => Err(ModelError::InvalidItemType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    pub file: String,
    #[serde(default)]
    pub original_file: String,
    #[serde(default)]
    pub rename_target: String,
    pub instruction: Instruction,
    #[serde(default)]
    pub item_type: ItemType,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub modtime: i64,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub checksum_header: Option<String>,
}

impl SyncItem {
    pub fn new(file: impl Into<String>, instruction: Instruction, item_type: ItemType) -> Self {
        let file = file.into();
        Self {
            original_file: file.clone(),
            file,
            rename_target: String::new(),
            instruction,
            item_type,
            size: 0,
            modtime: 0,
            etag: String::new(),
            file_id: None,
            checksum_header: None,
        }
    }

    pub fn with_rename_target(mut self, target: impl Into<String>) -> Self {
        self.rename_target = target.into();
        self
    }

    pub fn with_content(mut self, size: i64, modtime: i64) -> Self {
        self.size = size;
        self.modtime = modtime;
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }

    pub fn is_directory(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    /// Path the journal knew this item under before the current operation.
    pub fn journal_key(&self) -> &str {
        if self.original_file.is_empty() {
            &self.file
        } else {
            &self.original_file
        }
    }

    pub fn destination(&self) -> &str {
        if self.rename_target.is_empty() {
            &self.file
        } else {
            &self.rename_target
        }
    }

    /// Every path the item names must stay below the sync root.
    pub fn validate_paths(&self) -> Result<(), PathError> {
        validate_relative(&self.file)?;
        if !self.original_file.is_empty() {
            validate_relative(&self.original_file)?;
        }
        if !self.rename_target.is_empty() {
            validate_relative(&self.rename_target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_falls_back_to_file() {
        let item = SyncItem::new("docs/a.txt", Instruction::Mkdir, ItemType::Directory);
        assert_eq!(item.destination(), "docs/a.txt");

        let renamed = item.with_rename_target("docs/b.txt");
        assert_eq!(renamed.destination(), "docs/b.txt");
    }

    #[test]
    fn journal_key_prefers_original_file() {
        let mut item = SyncItem::new("new/a.txt", Instruction::Rename, ItemType::File);
        item.original_file = "old/a.txt".into();
        assert_eq!(item.journal_key(), "old/a.txt");

        item.original_file.clear();
        assert_eq!(item.journal_key(), "new/a.txt");
    }

    #[test]
    fn validate_paths_checks_every_named_path() {
        let item = SyncItem::new("a.txt", Instruction::Rename, ItemType::File)
            .with_rename_target("b.txt");
        assert!(item.validate_paths().is_ok());

        assert_eq!(
            SyncItem::new("", Instruction::Remove, ItemType::Directory).validate_paths(),
            Err(PathError::Empty)
        );

        let escaping = item.clone().with_rename_target("../b.txt");
        assert!(escaping.validate_paths().is_err());

        let mut absolute_key = item;
        absolute_key.original_file = "/a.txt".into();
        assert!(absolute_key.validate_paths().is_err());
    }

    #[test]
    fn item_type_round_trips_through_storage_names() {
        for kind in [ItemType::File, ItemType::Directory, ItemType::VirtualFile] {
            assert_eq!(ItemType::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(
            ItemType::parse("symlink"),
            Err(ModelError::InvalidItemType("symlink".into()))
        );
    }
}
