//! Generate mode: reconstruct a mapfile for an existing output file by
//! reading it back and marking every non-zero, hardbs-aligned region
//! `finished` — used to bootstrap a mapfile for a file recovered by some
//! other tool.

use std::fs::File;

use crate::block::{Block, PassState, Status};
use crate::io_primitives::{block_is_zero, interrupted, read_block, set_signals};
use crate::rescue::RescueError;
use crate::status_map::StatusMap;

pub struct GenerateOptions {
    pub softbs: i64,
    pub hardbs: i64,
    pub offset: i64,
}

pub struct GenerateReport {
    pub recovered_size: i64,
    pub generated_size: i64,
    pub interrupted: bool,
}

/// Scan `ifile` (the existing output file being re-indexed) and mark every
/// non-zero hardbs-aligned chunk `finished` in `map`.
pub fn do_generate(
    map: &mut StatusMap,
    ifile: &File,
    opts: &GenerateOptions,
) -> Result<GenerateReport, RescueError> {
    set_signals()?;

    let mut pos = if opts.offset >= 0 { 0 } else { -opts.offset };
    if map.current_status() == PassState::Generating && map.domain().includes(map.current_pos())
    {
        pos = map.current_pos();
    }

    loop {
        let probe = Block::new(pos, opts.softbs);
        let found = map.find_chunk(probe, Status::NonTried, 1);
        if found.size() <= 0 {
            break;
        }
        pos = found.end();
        map.set_current_status(PassState::Generating);
        map.set_current_pos(found.pos());
        if interrupted() {
            let (recovered_size, generated_size) = size_totals(map);
            return Ok(GenerateReport {
                recovered_size,
                generated_size,
                interrupted: true,
            });
        }
        let (copied_size, error_size) = check_block(map, ifile, &found, opts)?;
        if copied_size + error_size < found.size() {
            map.truncate_vector(found.pos() + copied_size + error_size);
        }
        map.flush(false)?;
    }
    map.set_current_status(PassState::Finished);
    map.compact();
    map.flush(true)?;
    let (recovered_size, generated_size) = size_totals(map);
    Ok(GenerateReport {
        recovered_size,
        generated_size,
        interrupted: false,
    })
}

/// `recovered_size` is the domain-filtered `finished` byte total; `generated_size`
/// is every byte the scan actually classified (anything but a still-`non_tried`
/// trailing remainder).
fn size_totals(map: &StatusMap) -> (i64, i64) {
    let mut recovered_size = 0i64;
    let mut generated_size = 0i64;
    let sblocks = map.sblocks();
    for (i, sb) in sblocks.iter().enumerate() {
        if !map.domain().includes_block(&sb.block()) {
            continue;
        }
        if sb.status() == Status::Finished {
            recovered_size += sb.size();
        }
        if sb.status() != Status::NonTried || i + 1 < sblocks.len() {
            generated_size += sb.size();
        }
    }
    (recovered_size, generated_size)
}

/// Read `b` from `ifile` and mark every non-zero hardbs-aligned run inside
/// it `finished`.
fn check_block(
    map: &mut StatusMap,
    ifile: &File,
    b: &Block,
    opts: &GenerateOptions,
) -> Result<(i64, i64), RescueError> {
    let mut buf = vec![0u8; b.size() as usize];
    let (n, err) = read_block(ifile, &mut buf, b.pos() + opts.offset);
    let copied_size = n as i64;
    let error_size = if err.is_some() { b.size() - copied_size } else { 0 };

    let mut pos = 0i64;
    while pos < copied_size {
        let size = opts.hardbs.min(copied_size - pos);
        let chunk = &buf[pos as usize..(pos + size) as usize];
        if !block_is_zero(chunk) {
            map.change_chunk_status(&Block::new(b.pos() + pos, size), Status::Finished)?;
        }
        pos += size;
    }
    Ok((copied_size, error_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn generate_marks_nonzero_regions_finished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovered.img");
        let mut data = vec![0u8; 64];
        data[16..32].fill(0xFF);
        std::fs::write(&path, &data).unwrap();
        let ifile = File::open(&path).unwrap();

        let mut map = StatusMap::new(64, Domain::everything(), None, 16, false, true, "test".into()).unwrap();
        let opts = GenerateOptions {
            softbs: 64,
            hardbs: 16,
            offset: 0,
        };
        let report = do_generate(&mut map, &ifile, &opts).unwrap();
        assert!(!report.interrupted);
        let found = map
            .sblocks()
            .iter()
            .find(|sb| sb.pos() == 16)
            .expect("sblock at 16");
        assert_eq!(found.status(), Status::Finished);
    }
}
