use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Multipart field carrying each file part of a batch.
pub const FILES_FIELD: &str = "files";
/// Multipart field carrying the storage namespace.
pub const FOLDER_FIELD: &str = "folder";
/// Multipart field carrying the owning record, when there is one.
pub const PARENT_ID_FIELD: &str = "parentId";

/// Descriptor of a file the upload endpoint has persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(
        default,
        alias = "contentType",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
    #[serde(default, alias = "size", skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<serde_json::Value>,
}

impl UploadedFile {
    /// Server identity if one was assigned, otherwise the retrieval URL.
    pub fn identity_key(&self) -> Option<&str> {
        [&self.id, &self.key, &self.url]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|key| !key.is_empty())
    }

    pub fn has_identity(&self) -> bool {
        self.identity_key().is_some()
    }

    /// True when `key` names this file by `_id`, storage key or URL.
    pub fn matches_key(&self, key: &str) -> bool {
        [&self.id, &self.key, &self.url]
            .into_iter()
            .any(|candidate| candidate.as_deref() == Some(key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub files: Vec<UploadedFile>,
}

impl UploadResponse {
    /// Index of the first descriptor carrying neither an identity nor a URL.
    pub fn first_unidentified(&self) -> Option<usize> {
        self.files.iter().position(|file| !file.has_identity())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileRequest {
    pub file_key: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
