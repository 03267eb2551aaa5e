//! End-to-end tests that drive the public API through a real file on disk,
//! the way a caller actually uses this crate: `Source::Path` -> open ->
//! walk the root directory -> read a file's contents -> resolve a path.
//!
//! The synthetic archive here is hand-assembled at the byte level rather
//! than produced by a real `mksquashfs`, since the crate has no writer.

use std::io::Write;

use squashfs_core::{InodeType, Source, Squashfs, SquashfsError};
use tempfile::tempdir;
use test_log::test;

const MAGIC: [u8; 4] = *b"hsqs";
const NOT_SET: u64 = 0xffff_ffff_ffff_ffff;

fn uncompressed_metablock(payload: &[u8]) -> Vec<u8> {
    let mut block = Vec::new();
    let len = (payload.len() as u16) | (1 << 15);
    block.extend_from_slice(&len.to_le_bytes());
    block.extend_from_slice(payload);
    block
}

/// An archive with one id table entry (id `5000`, used for both uid and
/// gid), a root directory containing a single file `hello.txt` whose 4106
/// bytes of content span two 4 KiB datablocks (no fragment).
fn one_file_archive() -> Vec<u8> {
    let block_size: u32 = 0x1000;
    let block_log: u16 = 12;

    // All section sizes below are fixed regardless of content, so the
    // data section's offset can be computed up front and baked into the
    // file inode as it's built.
    let id_table_start = 96u64;
    let id_block_len = uncompressed_metablock(&0u32.to_le_bytes()).len() as u64; // 6
    let inode_table_start = id_table_start + 8 + id_block_len;
    let root_inode_len = 32u64;
    let file_inode_len = 40u64;
    let inode_block_len = 2 + root_inode_len + file_inode_len;
    let dir_table_start = inode_table_start + inode_block_len;
    let dir_payload_len = 29u64;
    let dir_block_len = 2 + dir_payload_len;
    let data_start = dir_table_start + dir_block_len;

    let id_payload = 5000u32.to_le_bytes().to_vec();
    let id_block = uncompressed_metablock(&id_payload);
    let id_block_start = id_table_start + 8;
    assert_eq!(id_block.len() as u64, id_block_len);
    let mut id_ptr_array = Vec::new();
    id_ptr_array.extend_from_slice(&id_block_start.to_le_bytes());

    let mut root_inode = Vec::new();
    root_inode.extend_from_slice(&1u16.to_le_bytes()); // InodeId::BasicDirectory
    root_inode.extend_from_slice(&0o755u16.to_le_bytes());
    root_inode.extend_from_slice(&0u16.to_le_bytes()); // uid index
    root_inode.extend_from_slice(&0u16.to_le_bytes()); // gid index
    root_inode.extend_from_slice(&0u32.to_le_bytes()); // mtime
    root_inode.extend_from_slice(&1u32.to_le_bytes()); // inode_number
    root_inode.extend_from_slice(&0u32.to_le_bytes()); // block_index: dir table outer offset 0
    root_inode.extend_from_slice(&2u32.to_le_bytes()); // link_count
    root_inode.extend_from_slice(&32u16.to_le_bytes()); // file_size: 29 + 3
    root_inode.extend_from_slice(&0u16.to_le_bytes()); // block_offset
    root_inode.extend_from_slice(&0u32.to_le_bytes()); // parent_inode
    assert_eq!(root_inode.len() as u64, root_inode_len);

    let mut file_inode = Vec::new();
    file_inode.extend_from_slice(&2u16.to_le_bytes()); // InodeId::BasicFile
    file_inode.extend_from_slice(&0o644u16.to_le_bytes());
    file_inode.extend_from_slice(&0u16.to_le_bytes()); // uid index
    file_inode.extend_from_slice(&0u16.to_le_bytes()); // gid index
    file_inode.extend_from_slice(&0u32.to_le_bytes()); // mtime
    file_inode.extend_from_slice(&2u32.to_le_bytes()); // inode_number
    file_inode.extend_from_slice(&(data_start as u32).to_le_bytes()); // blocks_start
    file_inode.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // frag_index: none
    file_inode.extend_from_slice(&0u32.to_le_bytes()); // block_offset
    file_inode.extend_from_slice(&4106u32.to_le_bytes()); // file_size
    file_inode.extend_from_slice(&(4096u32 | (1 << 24)).to_le_bytes()); // block 0: uncompressed
    file_inode.extend_from_slice(&(10u32 | (1 << 24)).to_le_bytes()); // block 1: uncompressed
    assert_eq!(file_inode.len() as u64, file_inode_len);
    let file_inode_offset = root_inode.len() as u16; // inner offset within the inode metablock

    let mut inode_payload = root_inode;
    inode_payload.extend(&file_inode);
    let inode_block = uncompressed_metablock(&inode_payload);
    assert_eq!(inode_block.len() as u64, inode_block_len);

    let mut dir_payload = Vec::new();
    dir_payload.extend_from_slice(&0u32.to_le_bytes()); // count - 1
    dir_payload.extend_from_slice(&0u32.to_le_bytes()); // start: inode table outer offset 0
    dir_payload.extend_from_slice(&1u32.to_le_bytes()); // inode_num base: root's own number
    dir_payload.extend_from_slice(&file_inode_offset.to_le_bytes());
    dir_payload.extend_from_slice(&1i16.to_le_bytes()); // inode_offset: 2 - 1
    dir_payload.extend_from_slice(&2u16.to_le_bytes()); // t: BasicFile
    dir_payload.extend_from_slice(&8u16.to_le_bytes()); // name_size: len("hello.txt") - 1
    dir_payload.extend_from_slice(b"hello.txt");
    assert_eq!(dir_payload.len() as u64, dir_payload_len);
    let dir_block = uncompressed_metablock(&dir_payload);
    assert_eq!(dir_block.len() as u64, dir_block_len);

    let mut image = vec![0u8; 96];
    image[0..4].copy_from_slice(&MAGIC);
    image[4..8].copy_from_slice(&2u32.to_le_bytes()); // inode_count
    image[12..16].copy_from_slice(&block_size.to_le_bytes());
    image[20..22].copy_from_slice(&0u16.to_le_bytes()); // compressor: none
    image[22..24].copy_from_slice(&block_log.to_le_bytes());
    image[26..28].copy_from_slice(&1u16.to_le_bytes()); // id_count
    image[28..30].copy_from_slice(&4u16.to_le_bytes()); // version_major
    image[32..40].copy_from_slice(&0u64.to_le_bytes()); // root_inode ref: outer 0, inner 0
    image[48..56].copy_from_slice(&id_table_start.to_le_bytes());
    image[56..64].copy_from_slice(&NOT_SET.to_le_bytes()); // xattr_table
    image[64..72].copy_from_slice(&inode_table_start.to_le_bytes());
    image[72..80].copy_from_slice(&dir_table_start.to_le_bytes());
    image[80..88].copy_from_slice(&NOT_SET.to_le_bytes()); // frag_table
    image[88..96].copy_from_slice(&NOT_SET.to_le_bytes()); // export_table

    image.extend(id_ptr_array);
    image.extend(id_block);
    image.extend(inode_block);
    image.extend(dir_block);
    assert_eq!(image.len() as u64, data_start);

    image.extend(vec![b'A'; 4096]);
    image.extend(vec![b'B'; 10]);

    let bytes_used = image.len() as u64;
    image[40..48].copy_from_slice(&bytes_used.to_le_bytes());

    image
}

fn write_to_tempfile(image: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.squashfs");
    std::fs::File::create(&path).unwrap().write_all(image).unwrap();
    (dir, path)
}

#[test]
fn opens_traverses_and_reads_file_over_a_real_path() {
    let image = one_file_archive();
    let (_dir, path) = write_to_tempfile(&image);

    let archive = Squashfs::open(Source::Path(path)).unwrap();
    assert_eq!(archive.superblock().inode_count, 2);

    let root = archive.root_inode().unwrap();
    assert_eq!(root.inode_type(), InodeType::Directory);

    let mut dir_reader = archive.read_dir(&root).unwrap();
    let entry = dir_reader.next().unwrap().unwrap();
    assert_eq!(entry.name, b"hello.txt");
    assert!(dir_reader.next().is_none());

    let file_inode = archive.inode(entry.inode_ref).unwrap();
    assert_eq!(file_inode.inode_type(), InodeType::File);
    assert_eq!(file_inode.file_size(), 4106);

    let mut file = archive.open_file(&file_inode).unwrap();
    let mut out = Vec::new();
    let mut chunk = vec![0u8; 512];
    loop {
        let n = file.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(out.len(), 4106);
    assert!(out[..4096].iter().all(|&b| b == b'A'));
    assert!(out[4096..].iter().all(|&b| b == b'B'));

    let uid = archive.resolve_id(file_inode.uid_index()).unwrap();
    assert_eq!(uid, 5000);

    let resolved = archive.resolve("hello.txt").unwrap();
    assert_eq!(resolved, entry.inode_ref);
}

#[test]
fn resolving_a_missing_path_returns_no_such_file() {
    let image = one_file_archive();
    let (_dir, path) = write_to_tempfile(&image);

    let archive = Squashfs::open(Source::Path(path)).unwrap();
    let err = archive.resolve("nope.txt").unwrap_err();
    assert!(matches!(err, SquashfsError::NoSuchFile));
}

#[test]
fn open_file_on_a_directory_inode_is_rejected() {
    let image = one_file_archive();
    let (_dir, path) = write_to_tempfile(&image);

    let archive = Squashfs::open(Source::Path(path)).unwrap();
    let root = archive.root_inode().unwrap();
    let err = archive.open_file(&root).unwrap_err();
    assert!(matches!(err, SquashfsError::NotAFile));
}
