//! File handles the bridge decompiles and resolves classes from.
//!
//! Two kinds exist: plain files on disk and entries of a memory-mapped jar.
//! Both carry a small side-data store where results for downstream
//! consumers (the line mapping) are attached.

use anyhow::{Context, Result, bail};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

use crate::provider::LineNumbersMapping;

#[derive(Debug, Default)]
pub struct UserData {
    line_mapping: Mutex<Option<LineNumbersMapping>>,
}

impl UserData {
    pub fn put_line_mapping(&self, mapping: LineNumbersMapping) {
        *self.line_mapping.lock() = Some(mapping);
    }

    pub fn line_mapping(&self) -> Option<LineNumbersMapping> {
        self.line_mapping.lock().clone()
    }
}

pub trait VirtualFile: Send + Sync + fmt::Debug {
    /// Absolute path; jar entries use `<jar>!/<entry>`.
    fn path(&self) -> PathBuf;

    fn name(&self) -> String;

    fn is_directory(&self) -> bool;

    fn contents(&self) -> Result<Vec<u8>>;

    fn parent(&self) -> Option<Arc<dyn VirtualFile>>;

    fn children(&self) -> Result<Vec<Arc<dyn VirtualFile>>>;

    fn user_data(&self) -> &UserData;

    fn name_without_extension(&self) -> String {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => name,
        }
    }

    fn extension(&self) -> Option<String> {
        self.name().rsplit_once('.').map(|(_, ext)| ext.to_string())
    }

    fn is_class_file(&self) -> bool {
        !self.is_directory() && self.extension().as_deref() == Some("class")
    }

    fn find_child(&self, name: &str) -> Option<Arc<dyn VirtualFile>> {
        self.children()
            .ok()?
            .into_iter()
            .find(|child| child.name() == name)
    }
}

#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    user_data: UserData,
}

impl LocalFile {
    pub fn new(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let path = std::path::absolute(path)
            .with_context(|| format!("Failed to resolve path: {}", path.display()))?;
        Ok(Arc::new(Self {
            path,
            user_data: UserData::default(),
        }))
    }
}

impl VirtualFile for LocalFile {
    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn is_directory(&self) -> bool {
        self.path.is_dir()
    }

    fn contents(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Failed to read file: {}", self.path.display()))
    }

    fn parent(&self) -> Option<Arc<dyn VirtualFile>> {
        let parent = self.path.parent()?;
        Some(Arc::new(LocalFile {
            path: parent.to_path_buf(),
            user_data: UserData::default(),
        }))
    }

    fn children(&self) -> Result<Vec<Arc<dyn VirtualFile>>> {
        if !self.path.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.path)
            .with_context(|| format!("Failed to list directory: {}", self.path.display()))?
        {
            paths.push(entry?.path());
        }
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| {
                Arc::new(LocalFile {
                    path,
                    user_data: UserData::default(),
                }) as Arc<dyn VirtualFile>
            })
            .collect())
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }
}

/// A jar mapped into memory, with its entry names listed once.
pub struct JarArchive {
    path: PathBuf,
    mmap: Mmap,
    entries: Vec<String>,
}

impl fmt::Debug for JarArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JarArchive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl JarArchive {
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let path = std::path::absolute(path)
            .with_context(|| format!("Failed to resolve jar path: {}", path.display()))?;
        let file =
            File::open(&path).with_context(|| format!("Failed to open jar: {}", path.display()))?;
        // SAFETY: The file is opened read-only and the mapping is owned by the
        // archive, which never hands out the raw bytes past its own lifetime.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap jar: {}", path.display()))?;
        let archive = ZipArchive::new(Cursor::new(&mmap[..]))
            .with_context(|| format!("Failed to read zip structure: {}", path.display()))?;
        let mut entries: Vec<String> = archive.file_names().map(str::to_string).collect();
        entries.sort();

        Ok(Arc::new(Self {
            path,
            mmap,
            entries,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.binary_search_by(|e| e.as_str().cmp(entry)).is_ok()
    }

    pub fn read(&self, entry: &str) -> Result<Vec<u8>> {
        let mut archive = ZipArchive::new(Cursor::new(&self.mmap[..]))
            .with_context(|| format!("Failed to read zip structure: {}", self.path.display()))?;
        let mut file = archive
            .by_name(entry)
            .with_context(|| format!("No entry {entry} in {}", self.path.display()))?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Handle for a file entry; `None` when the jar has no such entry.
    pub fn file(self: &Arc<Self>, entry: &str) -> Option<Arc<JarEntryFile>> {
        if !self.contains(entry) {
            return None;
        }
        Some(Arc::new(JarEntryFile {
            archive: Arc::clone(self),
            entry: entry.to_string(),
            directory: false,
            user_data: UserData::default(),
        }))
    }

    fn directory(self: &Arc<Self>, entry: &str) -> Arc<JarEntryFile> {
        Arc::new(JarEntryFile {
            archive: Arc::clone(self),
            entry: entry.trim_end_matches('/').to_string(),
            directory: true,
            user_data: UserData::default(),
        })
    }
}

#[derive(Debug)]
pub struct JarEntryFile {
    archive: Arc<JarArchive>,
    entry: String,
    directory: bool,
    user_data: UserData,
}

impl VirtualFile for JarEntryFile {
    fn path(&self) -> PathBuf {
        PathBuf::from(format!("{}!/{}", self.archive.path.display(), self.entry))
    }

    fn name(&self) -> String {
        if self.entry.is_empty() {
            return self
                .archive
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
        }
        self.entry
            .rsplit('/')
            .next()
            .unwrap_or(self.entry.as_str())
            .to_string()
    }

    fn is_directory(&self) -> bool {
        self.directory
    }

    fn contents(&self) -> Result<Vec<u8>> {
        if self.directory {
            bail!("{} is a directory", self.path().display());
        }
        self.archive.read(&self.entry)
    }

    fn parent(&self) -> Option<Arc<dyn VirtualFile>> {
        if self.entry.is_empty() {
            return None;
        }
        let parent = self.entry.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        Some(self.archive.directory(parent))
    }

    fn children(&self) -> Result<Vec<Arc<dyn VirtualFile>>> {
        if !self.directory {
            return Ok(Vec::new());
        }
        let prefix = if self.entry.is_empty() {
            String::new()
        } else {
            format!("{}/", self.entry)
        };

        // name -> is directory
        let mut names: BTreeMap<&str, bool> = BTreeMap::new();
        for entry in self.archive.entries() {
            let Some(rest) = entry.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) if !dir.is_empty() => {
                    names.insert(dir, true);
                }
                Some(_) => {}
                None if !rest.is_empty() => {
                    names.entry(rest).or_insert(false);
                }
                None => {}
            }
        }

        Ok(names
            .into_iter()
            .map(|(name, is_dir)| {
                let entry = format!("{prefix}{name}");
                if is_dir {
                    self.archive.directory(&entry) as Arc<dyn VirtualFile>
                } else {
                    Arc::new(JarEntryFile {
                        archive: Arc::clone(&self.archive),
                        entry,
                        directory: false,
                        user_data: UserData::default(),
                    }) as Arc<dyn VirtualFile>
                }
            })
            .collect())
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }
}
