//! Real ROOT files for reader tests
//!
//! oxyroot writes trees at the top of a file only. [`nest_tree`] moves such a tree
//! into a sub-directory the way ROOT lays one out: a `TDirectoryFile` key whose
//! record points at the sub-directory's own key list, listed in a new top key list.

use rarexsec_catalogue::services::root_layout::{KeyRecord, RootLayout};
use std::path::Path;

/// Write `name` at the top of a new file with `run`, `subRun` and `pot` branches
pub fn write_subrun_tree(path: &Path, name: &str, rows: &[(i32, i32, f64)]) {
    let runs: Vec<i32> = rows.iter().map(|r| r.0).collect();
    let subruns: Vec<i32> = rows.iter().map(|r| r.1).collect();
    let pot: Vec<f64> = rows.iter().map(|r| r.2).collect();

    let mut file = oxyroot::RootFile::create(path).unwrap();
    let mut tree = oxyroot::WriterTree::new(name);
    tree.new_branch("run", runs.into_iter());
    tree.new_branch("subRun", subruns.into_iter());
    tree.new_branch("pot", pot.into_iter());
    tree.write(&mut file).unwrap();
    file.close().unwrap();
}

/// Move the top-level key `tree` of `path` into a new sub-directory `dir`
///
/// Only 32-bit layouts are produced, which is all oxyroot writes for small files.
pub fn nest_tree(path: &Path, tree: &str, dir: &str) {
    let layout = RootLayout::read(path).unwrap();
    let top = *layout.top();
    assert!(!top.big);
    let mut moved = layout.key(tree).unwrap().clone();

    let mut bytes = std::fs::read(path).unwrap();
    let version = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
    assert!(version < 1_000_000);
    let begin = i32::from_be_bytes(bytes[8..12].try_into().unwrap()) as i64;

    // Sub-directory key list, then the directory key and record, then the new top list
    let list_at = bytes.len() as i64;
    let list_len = key_list(dir, list_at, 0, &[moved.clone()]).len() as i64;
    let dir_at = list_at + list_len;
    moved.seek_pdir = dir_at;
    let sub_list = key_list(dir, list_at, dir_at, &[moved]);

    let mut dir_key = KeyRecord {
        n_bytes: 0,
        version: 4,
        obj_len: 0,
        datime: 0,
        key_len: 0,
        cycle: 1,
        seek_key: dir_at,
        seek_pdir: begin,
        class: "TDirectoryFile".to_string(),
        name: dir.to_string(),
        title: dir.to_string(),
    };
    let key_len = key_bytes(&dir_key).len() as i32;
    let record = directory_record(sub_list.len() as i32, key_len, dir_at, begin, list_at);
    dir_key.key_len = key_len as i16;
    dir_key.obj_len = record.len() as i32;
    dir_key.n_bytes = key_len + record.len() as i32;

    let top_at = dir_at + dir_key.n_bytes as i64;
    let top_list = key_list("fixture.root", top_at, begin, &[dir_key.clone()]);

    bytes.extend(sub_list);
    bytes.extend(key_bytes(&dir_key));
    bytes.extend(record);
    bytes.extend(&top_list);

    let at = top.offset as usize;
    bytes[at + 10..at + 14].copy_from_slice(&(top_list.len() as i32).to_be_bytes());
    bytes[at + 26..at + 30].copy_from_slice(&(top_at as i32).to_be_bytes());
    let end = bytes.len() as i32;
    bytes[12..16].copy_from_slice(&end.to_be_bytes());

    std::fs::write(path, bytes).unwrap();
}

fn push_string(out: &mut Vec<u8>, text: &str) {
    assert!(text.len() < 255);
    out.push(text.len() as u8);
    out.extend_from_slice(text.as_bytes());
}

fn key_bytes(key: &KeyRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&key.n_bytes.to_be_bytes());
    out.extend_from_slice(&key.version.to_be_bytes());
    out.extend_from_slice(&key.obj_len.to_be_bytes());
    out.extend_from_slice(&key.datime.to_be_bytes());
    out.extend_from_slice(&key.key_len.to_be_bytes());
    out.extend_from_slice(&key.cycle.to_be_bytes());
    out.extend_from_slice(&(key.seek_key as i32).to_be_bytes());
    out.extend_from_slice(&(key.seek_pdir as i32).to_be_bytes());
    push_string(&mut out, &key.class);
    push_string(&mut out, &key.name);
    push_string(&mut out, &key.title);
    out
}

fn key_list(owner: &str, seek_keys: i64, seek_pdir: i64, entries: &[KeyRecord]) -> Vec<u8> {
    let mut payload = (entries.len() as i32).to_be_bytes().to_vec();
    for entry in entries {
        payload.extend(key_bytes(entry));
    }

    let mut header = KeyRecord {
        n_bytes: 0,
        version: 4,
        obj_len: payload.len() as i32,
        datime: 0,
        key_len: 0,
        cycle: 1,
        seek_key: seek_keys,
        seek_pdir,
        class: "TDirectory".to_string(),
        name: owner.to_string(),
        title: owner.to_string(),
    };
    let key_len = key_bytes(&header).len();
    header.key_len = key_len as i16;
    header.n_bytes = (key_len + payload.len()) as i32;

    let mut out = key_bytes(&header);
    out.extend(payload);
    out
}

fn directory_record(n_bytes_keys: i32, n_bytes_name: i32, seek_dir: i64, seek_parent: i64, seek_keys: i64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&5i16.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&n_bytes_keys.to_be_bytes());
    out.extend_from_slice(&n_bytes_name.to_be_bytes());
    out.extend_from_slice(&(seek_dir as i32).to_be_bytes());
    out.extend_from_slice(&(seek_parent as i32).to_be_bytes());
    out.extend_from_slice(&(seek_keys as i32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out
}
