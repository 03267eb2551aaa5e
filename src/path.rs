//! Path resolution: walk a `/`-separated path down from an archive's root,
//! one directory lookup per component.
//!
//! `..` is resolved against a stack of already-visited inode references
//! built up during the walk itself, rather than trusting the on-disk
//! `parent_inode` field — that field names an inode *number*, which would
//! need an export-table round trip to turn back into a reference, and
//! isn't populated at all on some extended directories.

use tracing::debug;

use crate::compressor::{CompressionAction, Compressor};
use crate::dir::DirReader;
use crate::error::SquashfsError;
use crate::inode::{Inode, InodeType};
use crate::mapper::Mapper;

/// Resolve `path` against `root` (the archive's root inode, already
/// decoded), returning the inode reference of the final component.
///
/// `path` may be absolute or relative; both are resolved identically, since
/// this crate has no notion of a current working directory other than the
/// archive root. Empty components (`//`, a trailing `/`) are skipped; `.`
/// is a no-op; `..` at the root resolves to the root itself.
pub fn resolve(
    mapper: &dyn Mapper,
    compression: &dyn CompressionAction,
    compressor: Compressor,
    dir_table_start: u64,
    block_size: u32,
    block_log: u16,
    inode_table_start: u64,
    root_ref: u64,
    path: &str,
) -> Result<u64, SquashfsError> {
    debug!("resolving path: {path}");
    let mut stack: Vec<u64> = vec![root_ref];

    for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
        if component == ".." {
            if stack.len() > 1 {
                stack.pop();
            }
            continue;
        }

        let current_ref = *stack.last().expect("stack always has the root");
        let inode = load_inode(mapper, compression, compressor, inode_table_start, block_size, block_log, current_ref)?;
        if inode.inode_type() != InodeType::Directory {
            return Err(SquashfsError::NotADirectory);
        }

        let mut dir = DirReader::new(mapper, compression, compressor, dir_table_start, &inode)?;
        let found = dir.lookup(component.as_bytes())?.ok_or(SquashfsError::NoSuchFile)?;
        stack.push(found.inode_ref);
    }

    Ok(*stack.last().expect("stack always has the root"))
}

fn load_inode(
    mapper: &dyn Mapper,
    compression: &dyn CompressionAction,
    compressor: Compressor,
    inode_table_start: u64,
    block_size: u32,
    block_log: u16,
    inode_ref: u64,
) -> Result<Inode, SquashfsError> {
    let mut stream = crate::metadata::MetablockStream::new(mapper, compression, compressor);
    stream.seek_ref(inode_table_start, inode_ref)?;
    Inode::read(&mut stream, block_size, block_log)
}
