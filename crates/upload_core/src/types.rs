use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shared::{domain::LocalFileId, protocol::UploadedFile};

use crate::error::UploadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Memory(Vec<u8>),
    Path(PathBuf),
    /// Seeded as pending without bytes; uploading it fails the batch.
    Unavailable,
}

impl FileSource {
    pub(crate) async fn read(&self, name: &str) -> Result<Vec<u8>, UploadError> {
        match self {
            Self::Memory(bytes) => Ok(bytes.clone()),
            Self::Path(path) => tokio::fs::read(path).await.map_err(|source| UploadError::Io {
                name: name.to_string(),
                source,
            }),
            Self::Unavailable => Err(UploadError::SourceUnavailable {
                name: name.to_string(),
            }),
        }
    }
}

/// A file the user picked or dropped, before the queue assigns it an id.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub source: FileSource,
}

impl NewFile {
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: Vec<u8>,
        mime_type: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            mime_type,
            source: FileSource::Memory(bytes),
        }
    }

    /// Queues a file on disk; its bytes are read when the batch is sent.
    pub async fn from_path(
        path: impl AsRef<Path>,
        mime_type: Option<String>,
    ) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| UploadError::Io {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            size: metadata.len(),
            mime_type,
            source: FileSource::Path(path.to_path_buf()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PendingFile {
    pub local_id: LocalFileId,
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub source: FileSource,
}

impl PendingFile {
    pub(crate) fn new(local_id: LocalFileId, file: NewFile) -> Self {
        Self {
            local_id,
            name: file.name,
            size: file.size,
            mime_type: file.mime_type,
            source: file.source,
        }
    }

    pub(crate) fn is_same_file(&self, file: &NewFile) -> bool {
        self.name == file.name
            && self.size == file.size
            && self.mime_type == file.mime_type
            && self.source == file.source
    }

    pub fn summary(&self) -> PendingSummary {
        PendingSummary {
            local_id: self.local_id,
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Pending file metadata as reported to listeners, without its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub local_id: LocalFileId,
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One element of the combined view: uploaded entries first, then pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileEntry {
    Uploaded(UploadedFile),
    Pending(PendingSummary),
}

impl FileEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Uploaded(file) => &file.original_name,
            Self::Pending(file) => &file.name,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded(_))
    }
}

/// Target of a removal: an uploaded entry by identity or URL, or a pending one by local id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Uploaded(String),
    Pending(LocalFileId),
}

/// Caller-supplied seed entry, typically the attachments of a record being edited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(alias = "name")]
    pub original_name: String,
    #[serde(
        default,
        alias = "contentType",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
    #[serde(default, alias = "size", skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip)]
    pub contents: Option<Vec<u8>>,
}

pub(crate) enum Seed {
    Uploaded(UploadedFile),
    Pending(NewFile),
}

impl FileDescriptor {
    pub(crate) fn into_seed(self) -> Seed {
        let uploaded = UploadedFile {
            id: self.id,
            key: self.key,
            url: self.url,
            original_name: self.original_name,
            file_name: None,
            mime_type: self.mime_type,
            file_size: self.file_size,
            uploaded_at: None,
            uploaded_by: None,
        };
        if uploaded.has_identity() {
            return Seed::Uploaded(uploaded);
        }

        let (size, source) = match (self.contents, self.path) {
            (Some(bytes), _) => (bytes.len() as u64, FileSource::Memory(bytes)),
            (None, Some(path)) => (uploaded.file_size.unwrap_or(0), FileSource::Path(path)),
            (None, None) => (uploaded.file_size.unwrap_or(0), FileSource::Unavailable),
        };
        Seed::Pending(NewFile {
            name: uploaded.original_name,
            size,
            mime_type: uploaded.mime_type,
            source,
        })
    }
}
