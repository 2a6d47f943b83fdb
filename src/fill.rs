//! Fill mode: overwrite every sblock whose status is in a caller-chosen set
//! with a fixed byte pattern, starting from the map's `current_pos` so an
//! interrupted fill resumes where it left off.

use std::fs::File;
use std::path::PathBuf;

use crate::block::{Block, PassState, Status};
use crate::io_primitives::{interrupted, set_signals, write_block};
use crate::rescue::RescueError;
use crate::status_map::StatusMap;

pub struct FillOptions {
    pub softbs: i64,
    pub offset: i64,
    /// Statuses whose areas get overwritten.
    pub fill_types: Vec<Status>,
    /// Byte pattern written to every filled sector.
    pub pattern: Vec<u8>,
}

pub struct FillReport {
    pub filled_size: i64,
    pub filled_areas: u32,
    pub interrupted: bool,
}

/// Fill every area of `map` whose status is in `opts.fill_types` with
/// `opts.pattern`, writing through `ofile`.
pub fn do_fill(
    map: &mut StatusMap,
    ofile: &File,
    iname: &PathBuf,
    opts: &FillOptions,
) -> Result<FillReport, RescueError> {
    let _ = iname;
    set_signals()?;
    if map.current_status() != PassState::Filling || !map.domain().includes(map.current_pos()) {
        map.set_current_pos(0);
    }

    let mut filled_size = 0i64;
    let mut filled_areas = 0u32;

    let targets: Vec<Block> = map
        .sblocks()
        .iter()
        .filter(|sb| {
            opts.fill_types.contains(&sb.status()) && map.domain().includes_block(&sb.block())
        })
        .map(|sb| sb.block())
        .collect();

    for sb in targets {
        if sb.end() <= map.current_pos() {
            continue;
        }
        map.set_current_status(PassState::Filling);
        let mut pos = map.current_pos().max(sb.pos());
        loop {
            let mut b = Block::new(pos, opts.softbs);
            if b.end() > sb.end() {
                b.crop(&sb);
            }
            if b.size() <= 0 {
                break;
            }
            map.set_current_pos(b.pos());
            if interrupted() {
                return Ok(FillReport {
                    filled_size,
                    filled_areas,
                    interrupted: true,
                });
            }
            let pattern = expand_pattern(&opts.pattern, b.size() as usize);
            let (written, err) = write_block(ofile, &pattern, b.pos() + opts.offset);
            if err.is_some() || written as i64 != b.size() {
                return Err(RescueError::Fatal("write error filling a block".into()));
            }
            filled_size += b.size();
            map.flush(false)?;
            pos = b.end();
        }
        filled_areas += 1;
    }
    map.set_current_status(PassState::Finished);
    map.compact();
    map.flush(true)?;
    Ok(FillReport {
        filled_size,
        filled_areas,
        interrupted: false,
    })
}

/// Repeat `pattern` (padding with its own bytes, like the original's
/// doubling fill of one sector's worth of input) to `len` bytes.
fn expand_pattern(pattern: &[u8], len: usize) -> Vec<u8> {
    if pattern.is_empty() {
        return vec![0u8; len];
    }
    pattern.iter().copied().cycle().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn expand_pattern_cycles() {
        assert_eq!(expand_pattern(&[1, 2, 3], 7), vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn fill_writes_over_bad_sectors() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.img");
        std::fs::write(&out_path, vec![0u8; 100]).unwrap();
        let ofile = File::options().write(true).open(&out_path).unwrap();

        let mut map = StatusMap::new(100, Domain::everything(), None, 1, false, true, "test".into()).unwrap();
        map.change_chunk_status(&Block::new(0, 50), Status::Finished)
            .unwrap();
        map.change_chunk_status(&Block::new(50, 50), Status::BadSector)
            .unwrap();

        let opts = FillOptions {
            softbs: 16,
            offset: 0,
            fill_types: vec![Status::BadSector],
            pattern: vec![0xAA],
        };
        let report = do_fill(&mut map, &ofile, &dir.path().join("in.img"), &opts).unwrap();
        assert_eq!(report.filled_size, 50);
        assert!(!report.interrupted);

        let contents = std::fs::read(&out_path).unwrap();
        assert!(contents[..50].iter().all(|&b| b == 0));
        assert!(contents[50..].iter().all(|&b| b == 0xAA));
    }
}
