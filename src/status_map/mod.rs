//! StatusMap — an ordered, gap-free `Vec<Sblock>` spanning `[0, isize)`
//! (or `[0, MAX)` when the source size is unknown), annotated with a
//! recovery [`Status`] per byte range, plus the two scalars (`current_pos`,
//! `current_status`) a [`crate::rescue::RescueEngine`] resumes a run from.
//!
//! This is the `Logbook` of the original: the mapfile's in-memory model and
//! the one place every status mutation funnels through, so the aggregate
//! error/good-byte counters a caller keeps can be maintained incrementally
//! instead of rescanned.

pub mod mapfile;

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;

use crate::block::{Block, PassState, Sblock, Status, MAX};
use crate::domain::Domain;
use mapfile::{MapfileContents, MapfileError};

#[derive(Debug, Error)]
pub enum StatusMapError {
    #[error("mapfile error: {0}")]
    Mapfile(#[from] MapfileError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// The mapfile flush is throttled to roughly once every
/// `30 + min(270, sblocks/38)` seconds, unless a caller forces it.
fn flush_interval(sblocks: usize) -> u64 {
    30 + (270usize).min(sblocks / 38) as u64
}

pub struct StatusMap {
    sblocks: Vec<Sblock>,
    domain: Domain,
    current_pos: i64,
    current_status: PassState,
    hardbs: i64,
    index: i64,
    filename: Option<PathBuf>,
    last_flush: Option<Instant>,
    command_line: String,
    logfile_exists: bool,
    logfile_isize: i64,
}

impl StatusMap {
    /// Build a fresh or resumed status map over `[offset, offset+isize)`,
    /// mirroring the original `Logbook` constructor: read an existing
    /// mapfile if present, extend the sblock vector to span the full input
    /// size, crop the domain to the file size, compact adjacent sblocks of
    /// equal status, and split any sblock straddling a domain border.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        isize_: i64,
        mut domain: Domain,
        logname: Option<&Path>,
        hardbs: i64,
        complete_only: bool,
        do_not_read: bool,
        command_line: String,
    ) -> Result<Self, StatusMapError> {
        domain.crop_by_file_size(isize_);

        let mut sblocks = Vec::new();
        let mut current_pos = 0i64;
        let mut current_status = PassState::Copying;
        let mut logfile_exists = false;

        if let (Some(path), false) = (logname, do_not_read) {
            if let Some(MapfileContents {
                sblocks: parsed,
                current_pos: cp,
                current_status: cs,
            }) = mapfile::read_mapfile(path)?
            {
                sblocks = parsed;
                current_pos = cp;
                current_status = cs;
                logfile_exists = true;
            }
        }
        let logfile_isize = sblocks.last().map(|sb| sb.end()).unwrap_or(0);

        if !complete_only {
            extend_sblock_vector(&mut sblocks, isize_);
        } else if let (Some(first), Some(last)) = (sblocks.first(), sblocks.last()) {
            let b = Block::new(first.pos(), last.end() - first.pos());
            domain.crop(&b);
        }

        let mut map = StatusMap {
            sblocks,
            domain,
            current_pos,
            current_status,
            hardbs: hardbs.max(1),
            index: 0,
            filename: logname.map(PathBuf::from),
            last_flush: None,
            command_line,
            logfile_exists,
            logfile_isize,
        };
        map.compact();
        map.split_domain_border_sblocks()?;
        if map.sblocks.is_empty() {
            map.domain = Domain::everything();
        }
        Ok(map)
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// True iff an existing mapfile was read at construction time (as
    /// opposed to starting from a fresh, single-`non_tried` state).
    pub fn logfile_exists(&self) -> bool {
        self.logfile_exists
    }

    /// The extent (last sblock's `end`) recorded in the mapfile as read,
    /// before it was padded out to the source size. `0` if no mapfile was
    /// read. Used by `-I`/`--verify-input-size` to compare against the
    /// live source size.
    pub fn logfile_isize(&self) -> i64 {
        self.logfile_isize
    }

    pub fn sblocks(&self) -> &[Sblock] {
        &self.sblocks
    }

    pub fn current_pos(&self) -> i64 {
        self.current_pos
    }

    pub fn set_current_pos(&mut self, pos: i64) {
        self.current_pos = pos;
    }

    pub fn current_status(&self) -> PassState {
        self.current_status
    }

    pub fn set_current_status(&mut self, status: PassState) {
        self.current_status = status;
    }

    pub fn hardbs(&self) -> i64 {
        self.hardbs
    }

    pub fn set_hardbs(&mut self, hardbs: i64) {
        self.hardbs = hardbs.max(1);
    }

    /// True iff every sblock is still `NonTried` (a fresh run).
    pub fn blank(&self) -> bool {
        self.sblocks.iter().all(|sb| sb.status() == Status::NonTried)
    }

    /// Locate the sblock containing `pos`, using (and updating) the cached
    /// index hint the way the original amortizes repeated nearby lookups.
    /// Returns `None` if `pos` falls outside every sblock (should not
    /// happen for a gap-free vector spanning the domain, but the original
    /// guards it anyway).
    fn find_index(&mut self, pos: i64) -> Option<usize> {
        if self.sblocks.is_empty() {
            return None;
        }
        let len = self.sblocks.len() as i64;
        if self.index < 0 || self.index >= len {
            self.index = len / 2;
        }
        let mut idx = self.index as usize;
        while idx + 1 < self.sblocks.len() && pos >= self.sblocks[idx].end() {
            idx += 1;
        }
        while idx > 0 && pos < self.sblocks[idx].pos() {
            idx -= 1;
        }
        self.index = idx as i64;
        if self.sblocks[idx].includes(pos) {
            Some(idx)
        } else {
            None
        }
    }

    /// Find a chunk starting at or after `b.pos()`, of size `<= b.size()`,
    /// carrying status `st` and lying inside the domain. Returns an empty
    /// block if none exists.
    pub fn find_chunk(&mut self, mut b: Block, st: Status, alignment: i64) -> Block {
        if b.size() <= 0 {
            return b;
        }
        if let Some(first) = self.sblocks.first() {
            if b.pos() < first.pos() {
                b.set_pos(first.pos());
            }
        }
        let Some(start) = self.find_index(b.pos()) else {
            return Block::new(0, 0);
        };
        let mut found = None;
        for i in start..self.sblocks.len() {
            if self.sblocks[i].status() == st && self.domain.includes_block(&self.sblocks[i].block())
            {
                found = Some(i);
                break;
            }
        }
        let Some(idx) = found else {
            return Block::new(0, 0);
        };
        self.index = idx as i64;
        if b.pos() < self.sblocks[idx].pos() {
            b.set_pos(self.sblocks[idx].pos());
        }
        b.fix_size();
        if !self.sblocks[idx].includes_block(&b) {
            b.crop(&self.sblocks[idx].block());
        }
        if b.end() != self.sblocks[idx].end() {
            b.align_end(if alignment > 0 { alignment } else { self.hardbs });
        }
        b
    }

    /// Find a chunk ending at or before `b.end()`, searching backwards, of
    /// size `<= b.size()`, carrying status `st` and lying inside the
    /// domain. Returns an empty block if none exists.
    pub fn rfind_chunk(&mut self, mut b: Block, st: Status, alignment: i64) -> Block {
        if b.size() <= 0 {
            return b;
        }
        b.fix_size();
        if let Some(last) = self.sblocks.last() {
            if last.end() < b.end() {
                b.set_end(last.end());
            }
        }
        let Some(mut idx) = self.find_index(b.end() - 1) else {
            return Block::new(0, 0);
        };
        loop {
            if self.sblocks[idx].status() == st && self.domain.includes_block(&self.sblocks[idx].block())
            {
                break;
            }
            if idx == 0 {
                return Block::new(0, 0);
            }
            idx -= 1;
        }
        self.index = idx as i64;
        if b.end() > self.sblocks[idx].end() {
            b.set_end(self.sblocks[idx].end());
        }
        if !self.sblocks[idx].includes_block(&b) {
            b.crop(&self.sblocks[idx].block());
        }
        if b.pos() != self.sblocks[idx].pos() {
            b.align_pos(if alignment > 0 { alignment } else { self.hardbs });
        }
        b
    }

    /// Change the status of `b` (which must lie entirely inside one sblock,
    /// itself inside the domain) to `st`, splitting and/or merging sblocks
    /// as needed to keep the vector gap-free and maximally compacted.
    ///
    /// Returns an adjustment of -1, 0 or +1 so a caller tracking an
    /// aggregate "errors" counter by good/bad status can update it without
    /// rescanning the whole vector:
    ///
    /// ```text
    ///   - - -   -->   - + -   return +1
    ///   - - +   -->   - + +   return  0
    ///   - + -   -->   - - -   return -1
    ///   - + +   -->   - - +   return  0
    ///   + - -   -->   + + -   return  0
    ///   + - +   -->   + + +   return -1
    ///   + + -   -->   + - -   return  0
    ///   + + +   -->   + - +   return +1
    /// ```
    pub fn change_chunk_status(&mut self, b: &Block, st: Status) -> Result<i32, StatusMapError> {
        if b.size() <= 0 {
            return Ok(0);
        }
        if !self.domain.includes_block(b) {
            return Err(StatusMapError::Internal(
                "can't change status of chunk not in rescue domain".into(),
            ));
        }
        let mut index = self
            .find_index(b.pos())
            .ok_or_else(|| StatusMapError::Internal("chunk not in rescue domain".into()))?;
        if !self.domain.includes_block(&self.sblocks[index].block()) {
            return Err(StatusMapError::Internal(
                "can't change status of chunk not in rescue domain".into(),
            ));
        }
        if !self.sblocks[index].includes_block(b) {
            return Err(StatusMapError::Internal(
                "can't change status of chunk spread over more than 1 block".into(),
            ));
        }
        if self.sblocks[index].status() == st {
            return Ok(0);
        }

        let old_st_good = self.sblocks[index].status().is_good();
        let new_st_good = st.is_good();
        let mut bl_st_good = index == 0
            || !self.domain.includes_block(&self.sblocks[index - 1].block())
            || self.sblocks[index - 1].status().is_good();
        let mut br_st_good = index + 1 >= self.sblocks.len()
            || !self.domain.includes_block(&self.sblocks[index + 1].block())
            || self.sblocks[index + 1].status().is_good();

        if self.sblocks[index].pos() < b.pos() {
            if self.sblocks[index].end() == b.end()
                && index + 1 < self.sblocks.len()
                && self.sblocks[index + 1].status() == st
                && self.domain.includes_block(&self.sblocks[index + 1].block())
            {
                self.sblocks[index].inc_size(-b.size());
                self.sblocks[index + 1].set_pos(b.pos());
                self.sblocks[index + 1].inc_size(b.size());
                return Ok(0);
            }
            let head = self.sblocks[index].split(b.pos(), 1);
            self.sblocks.insert(index, head);
            index += 1;
            bl_st_good = old_st_good;
        }

        if self.sblocks[index].size() > b.size() {
            self.sblocks[index].set_pos(b.end());
            self.sblocks[index].inc_size(-b.size());
            br_st_good = self.sblocks[index].status().is_good();
            if index > 0
                && self.sblocks[index - 1].status() == st
                && self.domain.includes_block(&self.sblocks[index - 1].block())
            {
                self.sblocks[index - 1].inc_size(b.size());
            } else {
                self.sblocks.insert(index, Sblock::from_block(*b, st));
            }
        } else {
            self.sblocks[index].set_status(st);
            if index > 0
                && self.sblocks[index - 1].status() == st
                && self.domain.includes_block(&self.sblocks[index - 1].block())
            {
                let sz = self.sblocks[index].size();
                self.sblocks[index - 1].inc_size(sz);
                self.sblocks.remove(index);
                index -= 1;
            }
            if index + 1 < self.sblocks.len()
                && self.sblocks[index + 1].status() == st
                && self.domain.includes_block(&self.sblocks[index + 1].block())
            {
                let sz = self.sblocks[index + 1].size();
                self.sblocks[index].inc_size(sz);
                self.sblocks.remove(index + 1);
            }
        }

        let mut retval = 0;
        if new_st_good != old_st_good && bl_st_good == br_st_good {
            retval = if old_st_good == bl_st_good { 1 } else { -1 };
        }
        Ok(retval)
    }

    /// Merge adjacent sblocks of equal status, scanning back to front as the
    /// original does (stable under repeated in-place erases).
    pub fn compact(&mut self) {
        let mut i = self.sblocks.len();
        while i >= 2 {
            i -= 1;
            let (left, right) = self.sblocks.split_at_mut(i);
            if left[i - 1].join(&right[0]) {
                self.sblocks.remove(i);
            }
        }
    }

    /// Drop every sblock at or beyond `pos`, truncating the last surviving
    /// one if it straddles `pos`.
    pub fn truncate_vector(&mut self, pos: i64) {
        let mut i = self.sblocks.len();
        while i > 0 && self.sblocks[i - 1].pos() >= pos {
            i -= 1;
        }
        if i == 0 {
            self.sblocks.clear();
            self.sblocks.push(Sblock::new(pos, 0, Status::NonTried));
            return;
        }
        if self.sblocks[i - 1].includes(pos) {
            let p = self.sblocks[i - 1].pos();
            self.sblocks[i - 1].set_size(pos - p);
        }
        self.sblocks.truncate(i);
    }

    /// Split the sblock containing `at` into two at that (hardbs-aligned)
    /// point, inserting the new prefix. No-op if `at` is not strictly
    /// interior to an sblock.
    pub fn split_sblock_by(&mut self, at: i64) -> Result<(), StatusMapError> {
        let Some(idx) = self.find_index(at) else {
            return Ok(());
        };
        let head = self.sblocks[idx].split(at, self.hardbs);
        if head.size() > 0 {
            self.sblocks.insert(idx, head);
        }
        Ok(())
    }

    /// Split any sblock that straddles a domain border, so later passes can
    /// treat "inside the domain" and "outside the domain" as sblock-aligned.
    fn split_domain_border_sblocks(&mut self) -> Result<(), StatusMapError> {
        let mut i = 0;
        while i < self.sblocks.len() {
            if let Some(pos) = self.domain.breaks_block_by(&self.sblocks[i].block()) {
                let head = self.sblocks[i].split(pos, 1);
                if head.size() > 0 {
                    self.sblocks.insert(i, head);
                } else {
                    return Err(StatusMapError::Internal(
                        "empty block created by split_domain_border_sblocks".into(),
                    ));
                }
            }
            i += 1;
        }
        Ok(())
    }

    /// Persist the mapfile, throttled to roughly once every
    /// `30 + min(270, sblocks/38)` seconds unless `force` is set.
    pub fn flush(&mut self, force: bool) -> Result<(), StatusMapError> {
        let Some(path) = self.filename.clone() else {
            return Ok(());
        };
        let interval = flush_interval(self.sblocks.len());
        if !force {
            if let Some(last) = self.last_flush {
                if last.elapsed().as_secs() < interval {
                    return Ok(());
                }
            }
        }
        mapfile::write_mapfile(
            &path,
            &self.sblocks,
            self.current_pos,
            self.current_status,
            &self.command_line,
        )
        .map_err(MapfileError::from)?;
        self.last_flush = Some(Instant::now());
        Ok(())
    }
}

/// Pad the sblock vector so it spans exactly `[0, isize)` (or `[0, MAX)` if
/// `isize <= 0`, i.e. the input size is not yet known), inserting
/// `NonTried` filler at the front/back as needed.
fn extend_sblock_vector(sblocks: &mut Vec<Sblock>, isize_: i64) {
    if sblocks.is_empty() {
        let size = if isize_ > 0 { isize_ } else { -1 };
        sblocks.push(Sblock::new(0, size, Status::NonTried));
        return;
    }
    if sblocks[0].pos() > 0 {
        let pos = sblocks[0].pos();
        sblocks.insert(0, Sblock::new(0, pos, Status::NonTried));
    }
    let back = *sblocks.last().unwrap();
    let end = back.end();
    if isize_ > 0 {
        if back.pos() >= isize_ {
            if back.pos() == isize_ && back.status() == Status::NonTried {
                sblocks.pop();
            }
            return;
        }
        if end < 0 || end > isize_ {
            let last = sblocks.last_mut().unwrap();
            let p = last.pos();
            last.set_size(isize_ - p);
        } else if end < isize_ {
            sblocks.push(Sblock::new(end, isize_ - end, Status::NonTried));
        }
    } else if end >= 0 {
        let sb = Sblock::new(end, -1, Status::NonTried);
        if sb.size() > 0 {
            sblocks.push(sb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_map(isize_: i64) -> StatusMap {
        StatusMap::new(
            isize_,
            Domain::everything(),
            None,
            512,
            false,
            true,
            "test".into(),
        )
        .unwrap()
    }

    #[test]
    fn fresh_map_is_one_non_tried_sblock() {
        let map = fresh_map(1000);
        assert_eq!(map.sblocks(), &[Sblock::new(0, 1000, Status::NonTried)]);
        assert!(map.blank());
    }

    #[test]
    fn change_status_splits_interior_chunk() {
        let mut map = fresh_map(1000);
        let delta = map
            .change_chunk_status(&Block::new(200, 100), Status::Finished)
            .unwrap();
        assert_eq!(delta, 0); // good -> good (non_tried and finished are both good)
        assert_eq!(
            map.sblocks(),
            &[
                Sblock::new(0, 200, Status::NonTried),
                Sblock::new(200, 100, Status::Finished),
                Sblock::new(300, 700, Status::NonTried),
            ]
        );
    }

    #[test]
    fn change_status_to_bad_then_back_round_trips_delta() {
        let mut map = fresh_map(1000);
        let d1 = map
            .change_chunk_status(&Block::new(0, 1000), Status::BadSector)
            .unwrap();
        assert_eq!(d1, -1); // good -> bad, neighbors (none) treated as good
        let d2 = map
            .change_chunk_status(&Block::new(0, 1000), Status::Finished)
            .unwrap();
        assert_eq!(d2, 1); // bad -> good
        assert_eq!(map.sblocks(), &[Sblock::new(0, 1000, Status::Finished)]);
    }

    #[test]
    fn change_status_merges_with_equal_status_neighbor() {
        let mut map = fresh_map(1000);
        map.change_chunk_status(&Block::new(0, 500), Status::Finished)
            .unwrap();
        map.change_chunk_status(&Block::new(500, 500), Status::Finished)
            .unwrap();
        assert_eq!(map.sblocks(), &[Sblock::new(0, 1000, Status::Finished)]);
    }

    #[test]
    fn compact_merges_equal_adjacent_status() {
        let mut map = fresh_map(100);
        map.sblocks = vec![
            Sblock::new(0, 50, Status::Finished),
            Sblock::new(50, 50, Status::Finished),
        ];
        map.compact();
        assert_eq!(map.sblocks(), &[Sblock::new(0, 100, Status::Finished)]);
    }

    #[test]
    fn truncate_vector_drops_tail() {
        let mut map = fresh_map(1000);
        map.change_chunk_status(&Block::new(0, 500), Status::Finished)
            .unwrap();
        map.truncate_vector(300);
        assert_eq!(map.sblocks(), &[Sblock::new(0, 300, Status::Finished)]);
    }

    #[test]
    fn find_chunk_locates_first_matching_status() {
        let mut map = fresh_map(1000);
        map.change_chunk_status(&Block::new(0, 500), Status::Finished)
            .unwrap();
        let found = map.find_chunk(Block::new(0, MAX), Status::NonTried, 1);
        assert_eq!(found, Block::new(500, 500));
    }

    #[test]
    fn rfind_chunk_locates_last_matching_status() {
        let mut map = fresh_map(1000);
        map.change_chunk_status(&Block::new(500, 500), Status::Finished)
            .unwrap();
        let found = map.rfind_chunk(Block::new(0, MAX), Status::NonTried, 1);
        assert_eq!(found, Block::new(0, 500));
    }

    #[test]
    fn unknown_size_extends_to_max() {
        let map = fresh_map(0);
        assert_eq!(map.sblocks(), &[Sblock::new(0, MAX, Status::NonTried)]);
    }
}
