//! Key index of a ROOT file
//!
//! Walks the key list of the top directory and of every sub-directory without
//! decoding any stored object, so the event-file reader can tell trees from
//! directories (and from histograms) before it asks the object decoder for one.
//!
//! Layout notes, all integers big-endian:
//! - File header: `"root"`, version, `fBEGIN`, then 32- or 64-bit seeks depending on
//!   whether the version is above 1000000; `fNbytesName` follows the free-segment
//!   counters
//! - Directory record (`TDirectory` streamer): version, two dates, `fNbytesKeys`,
//!   `fNbytesName`, then `fSeekDir`/`fSeekParent`/`fSeekKeys`, 64-bit when the record
//!   version is above 1000
//! - Key list: a header key, then `nkeys` followed by that many key headers

use indexmap::IndexMap;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

/// File magic
pub const ROOT_MAGIC: &[u8; 4] = b"root";

/// Class name of tree objects
pub const TREE_CLASS: &str = "TTree";

const DIRECTORY_CLASSES: [&str; 2] = ["TDirectory", "TDirectoryFile"];

/// Enough for the widest file header
const HEADER_PREFIX_LEN: u64 = 64;

/// Version, dates, two counters and three 64-bit seeks
const DIRECTORY_RECORD_LEN: u64 = 42;

const MAX_DIRECTORY_DEPTH: usize = 32;

/// Offset of `fNbytesKeys` inside a directory record
const N_BYTES_KEYS_OFFSET: u64 = 10;

/// Offset of `fSeekKeys` for 32-bit and 64-bit records
const SEEK_KEYS_OFFSET_SMALL: u64 = 26;
const SEEK_KEYS_OFFSET_BIG: u64 = 34;

/// Layout errors
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a ROOT file (bad magic)")]
    BadMagic,

    #[error("Truncated {what} at offset {offset}")]
    Truncated { what: &'static str, offset: u64 },

    #[error("Corrupt {what} at offset {offset}")]
    Corrupt { what: &'static str, offset: u64 },

    #[error("Directory '{0}' does not exist")]
    NoSuchDirectory(String),

    #[error("Key list of '{0}' lies beyond a 32-bit seek")]
    SeekOverflow(String),
}

/// One key header as stored in a key list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub n_bytes: i32,
    pub version: i16,
    pub obj_len: i32,
    pub datime: u32,
    pub key_len: i16,
    pub cycle: i16,
    pub seek_key: i64,
    pub seek_pdir: i64,
    pub class: String,
    pub name: String,
    pub title: String,
}

impl KeyRecord {
    pub fn is_directory(&self) -> bool {
        DIRECTORY_CLASSES.contains(&self.class.as_str())
    }

    pub fn is_tree(&self) -> bool {
        self.class == TREE_CLASS
    }
}

/// Location of a directory record and of the key list it points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// File offset of the record itself
    pub offset: u64,
    /// 64-bit seek fields
    pub big: bool,
    pub n_bytes_keys: i32,
    pub seek_keys: i64,
}

/// Key index of one file
#[derive(Debug, Clone)]
pub struct RootLayout {
    top: DirectoryRecord,
    directories: BTreeMap<String, DirectoryRecord>,
    /// `dir/…/name` → highest cycle of that key
    keys: IndexMap<String, KeyRecord>,
}

impl RootLayout {
    pub fn read(path: &Path) -> Result<Self, LayoutError> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let header = read_region(&mut file, size, 0, HEADER_PREFIX_LEN.min(size), "file header")?;
        let mut d = Decoder::new(&header, 0);
        if d.bytes(4, "file header")? != ROOT_MAGIC {
            return Err(LayoutError::BadMagic);
        }
        let version = d.i32("file header")?;
        let begin = d.i32("file header")?;
        let wide = version > 1_000_000;
        d.seek_field(wide, "file header")?; // fEND
        d.seek_field(wide, "file header")?; // fSeekFree
        d.i32("file header")?; // fNbytesFree
        d.i32("file header")?; // nfree
        let n_bytes_name = d.i32("file header")?;
        if begin <= 0 || n_bytes_name <= 0 {
            return Err(LayoutError::Corrupt {
                what: "file header",
                offset: 0,
            });
        }

        let top = read_directory_record(&mut file, size, begin as u64 + n_bytes_name as u64)?;
        let mut layout = Self {
            top,
            directories: BTreeMap::new(),
            keys: IndexMap::new(),
        };
        layout.directories.insert(String::new(), top);

        let mut visited = HashSet::new();
        layout.walk(&mut file, size, "", top, 0, &mut visited)?;
        Ok(layout)
    }

    fn walk(
        &mut self,
        file: &mut File,
        size: u64,
        dir_path: &str,
        record: DirectoryRecord,
        depth: usize,
        visited: &mut HashSet<i64>,
    ) -> Result<(), LayoutError> {
        if record.seek_keys == 0 {
            return Ok(());
        }
        if depth > MAX_DIRECTORY_DEPTH || !visited.insert(record.seek_keys) {
            tracing::warn!(directory = dir_path, "Skipping directory (nesting loop or too deep)");
            return Ok(());
        }

        for key in read_key_list(file, size, &record)? {
            let path = if dir_path.is_empty() {
                key.name.clone()
            } else {
                format!("{}/{}", dir_path, key.name)
            };

            if key.is_directory() {
                let offset = key.seek_key as u64 + key.key_len as u64;
                let child = read_directory_record(file, size, offset).and_then(|child| {
                    self.directories.insert(path.clone(), child);
                    self.walk(file, size, &path, child, depth + 1, visited)
                });
                if let Err(e) = child {
                    tracing::warn!(directory = %path, "Skipping unreadable directory: {}", e);
                }
            }

            match self.keys.get(&path) {
                Some(existing) if existing.cycle >= key.cycle => {}
                _ => {
                    self.keys.insert(path, key);
                }
            }
        }
        Ok(())
    }

    /// Paths of every tree, in key order
    pub fn tree_paths(&self) -> impl Iterator<Item = &str> {
        self.keys
            .iter()
            .filter(|(_, key)| key.is_tree())
            .map(|(path, _)| path.as_str())
    }

    pub fn key(&self, path: &str) -> Option<&KeyRecord> {
        self.keys.get(path)
    }

    /// Directory record by path; `""` is the top directory
    pub fn directory(&self, path: &str) -> Option<&DirectoryRecord> {
        self.directories.get(path)
    }

    pub fn top(&self) -> &DirectoryRecord {
        &self.top
    }

    /// Point the top directory of `file` (a copy of the indexed file) at the key
    /// list of `dir_path`
    ///
    /// The copy then opens as if that directory were the file's root; every object
    /// and basket keeps its absolute offset.
    pub fn retarget_top(&self, file: &mut File, dir_path: &str) -> Result<(), LayoutError> {
        let target = self
            .directory(dir_path)
            .ok_or_else(|| LayoutError::NoSuchDirectory(dir_path.to_string()))?;

        file.seek(SeekFrom::Start(self.top.offset + N_BYTES_KEYS_OFFSET))?;
        file.write_all(&target.n_bytes_keys.to_be_bytes())?;

        if self.top.big {
            file.seek(SeekFrom::Start(self.top.offset + SEEK_KEYS_OFFSET_BIG))?;
            file.write_all(&target.seek_keys.to_be_bytes())?;
        } else {
            let seek = i32::try_from(target.seek_keys)
                .map_err(|_| LayoutError::SeekOverflow(dir_path.to_string()))?;
            file.seek(SeekFrom::Start(self.top.offset + SEEK_KEYS_OFFSET_SMALL))?;
            file.write_all(&seek.to_be_bytes())?;
        }
        file.flush()?;
        Ok(())
    }
}

fn read_region(
    file: &mut File,
    size: u64,
    offset: u64,
    len: u64,
    what: &'static str,
) -> Result<Vec<u8>, LayoutError> {
    if offset.checked_add(len).map_or(true, |end| end > size) {
        return Err(LayoutError::Truncated { what, offset });
    }
    let mut buf = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_directory_record(file: &mut File, size: u64, offset: u64) -> Result<DirectoryRecord, LayoutError> {
    let len = DIRECTORY_RECORD_LEN.min(size.saturating_sub(offset));
    let data = read_region(file, size, offset, len, "directory record")?;
    let mut d = Decoder::new(&data, offset);
    let version = d.i16("directory record")?;
    d.u32("directory record")?; // ctime
    d.u32("directory record")?; // mtime
    let n_bytes_keys = d.i32("directory record")?;
    d.i32("directory record")?; // fNbytesName
    let big = version > 1000;
    d.seek_field(big, "directory record")?; // fSeekDir
    d.seek_field(big, "directory record")?; // fSeekParent
    let seek_keys = d.seek_field(big, "directory record")?;

    // A directory that never received a key has no list
    if seek_keys < 0 || n_bytes_keys < 0 || (seek_keys > 0 && n_bytes_keys == 0) {
        return Err(LayoutError::Corrupt {
            what: "directory record",
            offset,
        });
    }
    Ok(DirectoryRecord {
        offset,
        big,
        n_bytes_keys,
        seek_keys,
    })
}

fn read_key_list(file: &mut File, size: u64, record: &DirectoryRecord) -> Result<Vec<KeyRecord>, LayoutError> {
    let offset = record.seek_keys as u64;
    let data = read_region(file, size, offset, record.n_bytes_keys as u64, "key list")?;
    let mut d = Decoder::new(&data, offset);

    let header = d.key("key list header")?;
    d.seek_to(header.key_len as usize, "key list")?;
    let count = d.i32("key list")?;
    if count < 0 {
        return Err(LayoutError::Corrupt { what: "key list", offset });
    }

    let mut keys = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = d.key("key header")?;
        // Negative byte counts mark gaps
        if key.n_bytes >= 0 {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Big-endian cursor over a buffer read from `base`
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    fn seek_to(&mut self, pos: usize, what: &'static str) -> Result<(), LayoutError> {
        if pos > self.data.len() {
            return Err(self.truncated(what));
        }
        self.pos = pos;
        Ok(())
    }

    fn truncated(&self, what: &'static str) -> LayoutError {
        LayoutError::Truncated {
            what,
            offset: self.base + self.pos as u64,
        }
    }

    fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], LayoutError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(self.truncated(what));
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], LayoutError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, LayoutError> {
        Ok(self.array::<1>(what)?[0])
    }

    fn i16(&mut self, what: &'static str) -> Result<i16, LayoutError> {
        Ok(i16::from_be_bytes(self.array(what)?))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, LayoutError> {
        Ok(i32::from_be_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, LayoutError> {
        Ok(u32::from_be_bytes(self.array(what)?))
    }

    fn i64(&mut self, what: &'static str) -> Result<i64, LayoutError> {
        Ok(i64::from_be_bytes(self.array(what)?))
    }

    fn seek_field(&mut self, wide: bool, what: &'static str) -> Result<i64, LayoutError> {
        if wide {
            self.i64(what)
        } else {
            self.i32(what).map(i64::from)
        }
    }

    /// Length-prefixed string; 255 announces a 32-bit length
    fn string(&mut self, what: &'static str) -> Result<String, LayoutError> {
        let short = self.u8(what)?;
        let len = if short == 255 {
            self.u32(what)? as usize
        } else {
            short as usize
        };
        let raw = self.bytes(len, what)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn key(&mut self, what: &'static str) -> Result<KeyRecord, LayoutError> {
        let start = self.pos;
        let n_bytes = self.i32(what)?;
        if n_bytes < 0 {
            return Ok(KeyRecord {
                n_bytes,
                version: 0,
                obj_len: 0,
                datime: 0,
                key_len: 0,
                cycle: 0,
                seek_key: 0,
                seek_pdir: 0,
                class: String::new(),
                name: String::new(),
                title: String::new(),
            });
        }
        let version = self.i16(what)?;
        let obj_len = self.i32(what)?;
        let datime = self.u32(what)?;
        let key_len = self.i16(what)?;
        let cycle = self.i16(what)?;
        let big = version > 1000;
        let seek_key = self.seek_field(big, what)?;
        let seek_pdir = self.seek_field(big, what)?;
        let class = self.string(what)?;
        let name = self.string(what)?;
        let title = self.string(what)?;

        if key_len < 0 || seek_key < 0 {
            return Err(LayoutError::Corrupt {
                what,
                offset: self.base + start as u64,
            });
        }
        Ok(KeyRecord {
            n_bytes,
            version,
            obj_len,
            datime,
            key_len,
            cycle,
            seek_key,
            seek_pdir,
            class,
            name,
            title,
        })
    }
}
