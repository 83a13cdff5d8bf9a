//! In-memory images for synthetic layouts
//!
//! Lets callers describe a volume, its partitions and the directory graph of
//! each filesystem directly, including shapes no sane filesystem would hold:
//! dangling entries, hard-linked directories, cycles, unreadable metadata.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    Directory, FileMeta, FileSystem, ForensicBackend, FsFile, Image, MetaType, Partition,
    PartitionFlags, Volume,
};

/// Backend serving images registered by path
#[derive(Default)]
pub struct MemoryBackend {
    images: HashMap<PathBuf, MemoryImage>,
    open_attempts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under `path`
    pub fn with_image(mut self, path: impl Into<PathBuf>, image: MemoryImage) -> Self {
        self.images.insert(path.into(), image);
        self
    }

    /// Number of `open_image` calls made so far, successful or not
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::Relaxed)
    }
}

impl ForensicBackend for MemoryBackend {
    fn open_image(&self, path: &Path) -> Result<Box<dyn Image>> {
        self.open_attempts.fetch_add(1, Ordering::Relaxed);
        match self.images.get(path) {
            Some(image) => Ok(Box::new(image.clone())),
            None => bail!("No image registered at {}", path.display()),
        }
    }
}

/// An image, optionally carrying a volume system
#[derive(Clone, Default)]
pub struct MemoryImage {
    volume: Option<Arc<MemoryVolume>>,
}

impl MemoryImage {
    pub fn new(volume: MemoryVolume) -> Self {
        Self {
            volume: Some(Arc::new(volume)),
        }
    }

    /// An image whose volume system cannot be detected
    pub fn without_volume() -> Self {
        Self { volume: None }
    }
}

impl Image for MemoryImage {
    fn open_volume(&self) -> Result<Box<dyn Volume>> {
        match &self.volume {
            Some(volume) => Ok(Box::new(Arc::clone(volume))),
            None => bail!("No volume system detected"),
        }
    }
}

/// A partition table with filesystems attached by partition address
pub struct MemoryVolume {
    block_size: u64,
    slots: Vec<Option<Partition>>,
    filesystems: HashMap<u64, MemoryFileSystem>,
}

impl MemoryVolume {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size,
            slots: Vec::new(),
            filesystems: HashMap::new(),
        }
    }

    /// Append a partition; its address is its slot index
    pub fn with_partition(
        mut self,
        label: Option<&str>,
        start: u64,
        length: u64,
        flags: PartitionFlags,
    ) -> Self {
        let address = self.slots.len() as u64;
        self.slots.push(Some(Partition {
            address,
            label: label.map(str::to_string),
            start,
            length,
            flags,
        }));
        self
    }

    /// Append a slot that yields no descriptor
    pub fn with_empty_slot(mut self) -> Self {
        self.slots.push(None);
        self
    }

    /// Attach a filesystem to the partition at `address`
    pub fn with_filesystem(mut self, address: u64, fs: MemoryFileSystem) -> Self {
        self.filesystems.insert(address, fs);
        self
    }
}

impl Volume for Arc<MemoryVolume> {
    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn partition_count(&self) -> u64 {
        self.slots.len() as u64
    }

    fn partition(&self, index: u64) -> Option<Partition> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(|slot| slot.clone())
    }

    fn open_filesystem(&self, partition: &Partition) -> Result<Box<dyn FileSystem + '_>> {
        match self.filesystems.get(&partition.address) {
            Some(fs) => Ok(Box::new(fs)),
            None => bail!(
                "No filesystem detected in partition {}",
                partition.address
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    name: Option<String>,
    inode: u64,
}

#[derive(Debug, Clone)]
struct MemoryNode {
    meta: Option<FileMeta>,
    entries: Vec<MemoryEntry>,
}

/// A filesystem described as an inode graph
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    type_name: String,
    flags: u32,
    offset: u64,
    block_size: u64,
    block_count: u64,
    inode_count: u64,
    root_inode: u64,
    nodes: BTreeMap<u64, MemoryNode>,
}

fn default_meta(inode: u64, meta_type: MetaType, name: Option<&str>, size: u64) -> FileMeta {
    let mode = if meta_type == MetaType::DIRECTORY {
        0o755
    } else {
        0o644
    };
    FileMeta {
        address: inode,
        uid: 0,
        gid: 0,
        mode,
        size,
        atime: 0,
        mtime: 0,
        crtime: 0,
        nlink: 1,
        meta_type,
        names: name.map(|n| vec![n.to_string()]).unwrap_or_default(),
    }
}

impl MemoryFileSystem {
    /// Empty filesystem holding only a root directory
    pub fn new(type_name: &str, root_inode: u64) -> Self {
        let mut fs = Self {
            type_name: type_name.to_string(),
            flags: 0,
            offset: 0,
            block_size: 4096,
            block_count: 0,
            inode_count: 0,
            root_inode,
            nodes: BTreeMap::new(),
        };
        fs.insert_node(root_inode, MetaType::DIRECTORY, None, 0);
        fs.link(root_inode, Some("."), root_inode);
        fs.link(root_inode, Some(".."), root_inode);
        fs
    }

    pub fn with_geometry(
        mut self,
        offset: u64,
        block_size: u64,
        block_count: u64,
        inode_count: u64,
    ) -> Self {
        self.offset = offset;
        self.block_size = block_size;
        self.block_count = block_count;
        self.inode_count = inode_count;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Create a node without linking it anywhere
    pub fn insert_node(
        &mut self,
        inode: u64,
        meta_type: MetaType,
        name: Option<&str>,
        size: u64,
    ) -> &mut FileMeta {
        let node = self.nodes.entry(inode).or_insert_with(|| MemoryNode {
            meta: None,
            entries: Vec::new(),
        });
        node.meta.insert(default_meta(inode, meta_type, name, size))
    }

    /// Add a directory entry in `parent` pointing at `inode`
    pub fn link(&mut self, parent: u64, name: Option<&str>, inode: u64) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.entries.push(MemoryEntry {
                name: name.map(str::to_string),
                inode,
            });
        }
    }

    /// Create a subdirectory with its own "." and ".." entries
    pub fn add_dir(&mut self, parent: u64, name: &str, inode: u64) -> u64 {
        self.insert_node(inode, MetaType::DIRECTORY, Some(name), 0);
        self.link(inode, Some("."), inode);
        self.link(inode, Some(".."), parent);
        self.link(parent, Some(name), inode);
        inode
    }

    /// Create a regular file
    pub fn add_file(&mut self, parent: u64, name: &str, inode: u64, size: u64) -> u64 {
        self.insert_node(inode, MetaType::REGULAR, Some(name), size);
        self.link(parent, Some(name), inode);
        inode
    }

    pub fn meta_mut(&mut self, inode: u64) -> Option<&mut FileMeta> {
        self.nodes.get_mut(&inode).and_then(|n| n.meta.as_mut())
    }

    /// Make the metadata of `inode` unreadable
    pub fn clear_meta(&mut self, inode: u64) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.meta = None;
        }
    }

    fn resolve(&self, name: Option<&str>, inode: u64) -> FsFile {
        FsFile {
            name: name.map(str::to_string),
            meta: self.nodes.get(&inode).and_then(|n| n.meta.clone()),
            block_size: Some(self.block_size),
        }
    }
}

struct MemoryDirectory<'a> {
    fs: &'a MemoryFileSystem,
    entries: &'a [MemoryEntry],
}

impl Directory for MemoryDirectory<'_> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, index: usize) -> Option<FsFile> {
        let entry = self.entries.get(index)?;
        Some(self.fs.resolve(entry.name.as_deref(), entry.inode))
    }
}

impl FileSystem for MemoryFileSystem {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn flags(&self) -> u32 {
        self.flags
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn inode_count(&self) -> u64 {
        self.inode_count
    }

    fn root_inode(&self) -> u64 {
        self.root_inode
    }

    fn open_dir(&self, inode: u64) -> Result<Box<dyn Directory + '_>> {
        let Some(node) = self.nodes.get(&inode) else {
            bail!("Inode {} not found", inode);
        };
        match &node.meta {
            Some(meta) if meta.meta_type == MetaType::DIRECTORY => Ok(Box::new(MemoryDirectory {
                fs: self,
                entries: &node.entries,
            })),
            Some(_) => bail!("Inode {} is not a directory", inode),
            None => bail!("Inode {} has no readable metadata", inode),
        }
    }

    fn open_inode(&self, inode: u64) -> Result<FsFile> {
        let file = self.resolve(None, inode);
        let Some(meta) = &file.meta else {
            bail!("Inode {} has no readable metadata", inode);
        };
        let name = meta.names.first().cloned();
        Ok(FsFile { name, ..file })
    }

    fn open_path(&self, path: &str) -> Result<FsFile> {
        let mut current = self.root_inode;
        let mut last = None;

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let Some(node) = self.nodes.get(&current) else {
                bail!("Path component {} not found", component);
            };
            let Some(entry) = node
                .entries
                .iter()
                .find(|e| e.name.as_deref() == Some(component))
            else {
                bail!("Path {} not found", path);
            };
            current = entry.inode;
            last = Some(component);
        }

        let file = self.resolve(last, current);
        if file.meta.is_none() {
            bail!("Path {} has no readable metadata", path);
        }
        Ok(file)
    }
}
