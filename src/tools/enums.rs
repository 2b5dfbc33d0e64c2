//! Small wire enums shared across tool argument schemas.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    Name,
    Size,
    Mtime,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryKindWire {
    File,
    Directory,
    Symlink,
    Other,
}

impl From<crate::glob::EntryKind> for EntryKindWire {
    fn from(kind: crate::glob::EntryKind) -> Self {
        match kind {
            crate::glob::EntryKind::File => Self::File,
            crate::glob::EntryKind::Directory => Self::Directory,
            crate::glob::EntryKind::Symlink => Self::Symlink,
            crate::glob::EntryKind::Other => Self::Other,
        }
    }
}
