//! Shared-file catalogs: the local one we offer and its wire entries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    fmt,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncRead};
use tracing::info;

const FILE_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const FILE_ID_LEN: usize = 8;
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Catalog-unique file token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Random 8-character lowercase base-36 token
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self(
            (0..FILE_ID_LEN)
                .map(|_| FILE_ID_ALPHABET[rng.gen_range(0..FILE_ID_ALPHABET.len())] as char)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FileId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a peer advertises about one shared file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCatalogEntry {
    pub file_id: FileId,
    pub name: String,
    pub byte_size: u64,
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    DEFAULT_MEDIA_TYPE.to_string()
}

/// Where the bytes of a shared file come from
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Arc<Vec<u8>>),
}

impl FileSource {
    pub async fn open(&self) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self {
            FileSource::Path(path) => Ok(Box::new(fs::File::open(path).await?)),
            FileSource::Memory(bytes) => Ok(Box::new(Cursor::new(SharedBytes(bytes.clone())))),
        }
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct SharedFile {
    pub entry: FileCatalogEntry,
    pub source: FileSource,
}

/// Files this endpoint offers, in the order they were added
#[derive(Debug, Default)]
pub struct FileCatalog {
    files: Vec<SharedFile>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry under its own file ID
    pub fn insert(&mut self, entry: FileCatalogEntry, source: FileSource) {
        let file = SharedFile { entry, source };
        match self.files.iter_mut().find(|f| f.entry.file_id == file.entry.file_id) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    pub fn add_bytes(&mut self, name: &str, media_type: Option<&str>, bytes: Vec<u8>) -> FileId {
        let file_id = self.fresh_id();
        let entry = FileCatalogEntry {
            file_id: file_id.clone(),
            name: name.to_string(),
            byte_size: bytes.len() as u64,
            media_type: media_type.map(str::to_string).unwrap_or_else(default_media_type),
        };
        self.insert(entry, FileSource::Memory(Arc::new(bytes)));
        info!("Sharing {} ({})", name, file_id);
        file_id
    }

    pub async fn add_path(&mut self, path: &Path) -> std::io::Result<FileId> {
        let size = fs::metadata(path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let file_id = self.fresh_id();
        let entry = FileCatalogEntry {
            file_id: file_id.clone(),
            media_type: guess_media_type(path).to_string(),
            name,
            byte_size: size,
        };
        info!("Sharing {} ({}, {} bytes)", path.display(), file_id, size);
        self.insert(entry, FileSource::Path(path.to_path_buf()));
        Ok(file_id)
    }

    pub fn remove(&mut self, file_id: &FileId) -> Option<SharedFile> {
        let index = self.files.iter().position(|f| &f.entry.file_id == file_id)?;
        Some(self.files.remove(index))
    }

    pub fn get(&self, file_id: &FileId) -> Option<&SharedFile> {
        self.files.iter().find(|f| &f.entry.file_id == file_id)
    }

    pub fn entries(&self) -> Vec<FileCatalogEntry> {
        self.files.iter().map(|f| f.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn fresh_id(&self) -> FileId {
        loop {
            let id = FileId::random();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}

/// Media type from the file extension
pub fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MEDIA_TYPE,
    }
}
