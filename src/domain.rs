//! Domain — an ordered, disjoint set of [`Block`]s acting as a mask over the
//! rescue range. A domain with an empty block list means "everything from 0
//! to the end of the source".

use crate::block::{Block, MAX};

/// An ordered, pairwise-disjoint set of [`Block`]s, used to restrict a rescue
/// run to one or more sub-ranges (the `--domain-logfile` / positional
/// ipos,opos,size triple in the original).
#[derive(Debug, Clone, Default)]
pub struct Domain {
    blocks: Vec<Block>,
}

impl Domain {
    /// The unrestricted domain: everything.
    pub fn everything() -> Self {
        Domain { blocks: Vec::new() }
    }

    /// A domain restricted to a single block.
    pub fn single(block: Block) -> Self {
        Domain {
            blocks: vec![block],
        }
    }

    /// Build a domain from the `finished` ('+') blocks of a mapfile-derived
    /// block list, as `ddrescuelog`-style domain logfiles do.
    pub fn from_finished_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        Domain {
            blocks: blocks.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Lowest in-domain position, or 0 if unrestricted.
    pub fn pos(&self) -> i64 {
        self.blocks.first().map(|b| b.pos()).unwrap_or(0)
    }

    /// Highest in-domain end position, or [`MAX`] if unrestricted.
    pub fn end(&self) -> i64 {
        self.blocks.last().map(|b| b.end()).unwrap_or(MAX)
    }

    /// True iff `point` falls inside the domain (or the domain is
    /// unrestricted).
    pub fn includes(&self, point: i64) -> bool {
        if self.blocks.is_empty() {
            return true;
        }
        self.blocks.iter().any(|b| b.includes(point))
    }

    /// True iff `block` lies entirely inside one domain member (or the
    /// domain is unrestricted).
    pub fn includes_block(&self, block: &Block) -> bool {
        if self.blocks.is_empty() {
            return true;
        }
        self.blocks.iter().any(|b| b.includes_block(block))
    }

    /// True iff `point` lies before every domain member; used by callers
    /// iterating forward through a domain to decide whether to advance.
    pub fn lt(&self, point: i64) -> bool {
        !self.blocks.is_empty() && point < self.blocks[0].pos()
    }

    /// True iff some domain boundary falls strictly inside `block`, meaning
    /// a caller iterating over `block` must split at that boundary before
    /// treating it as a single unit.
    pub fn breaks_block_by(&self, block: &Block) -> Option<i64> {
        for b in &self.blocks {
            if block.pos() < b.pos() && b.pos() < block.end() {
                return Some(b.pos());
            }
            if block.pos() < b.end() && b.end() < block.end() {
                return Some(b.end());
            }
        }
        None
    }

    /// Intersect every member block with `other` in place, dropping any that
    /// become empty.
    pub fn crop(&mut self, other: &Block) {
        if self.blocks.is_empty() {
            self.blocks.push(*other);
            return;
        }
        for b in &mut self.blocks {
            b.crop(other);
        }
        self.blocks.retain(|b| !b.is_empty());
    }

    /// Crop the domain to `[0, size)`, the size of an output file whose
    /// growth is otherwise unbounded.
    pub fn crop_by_file_size(&mut self, size: i64) {
        self.crop(&Block::new(0, size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_domain_includes_everything() {
        let d = Domain::everything();
        assert!(d.includes(0));
        assert!(d.includes(i64::MAX - 1));
        assert!(d.includes_block(&Block::new(1000, 500)));
    }

    #[test]
    fn single_domain_includes_only_inside() {
        let d = Domain::single(Block::new(100, 50));
        assert!(d.includes(100));
        assert!(d.includes(149));
        assert!(!d.includes(150));
        assert!(!d.includes(99));
    }

    #[test]
    fn crop_intersects_every_member() {
        let mut d = Domain::from_finished_blocks(vec![Block::new(0, 100), Block::new(200, 100)]);
        d.crop(&Block::new(50, 200));
        assert_eq!(d.blocks(), &[Block::new(50, 50), Block::new(200, 50)]);
    }

    #[test]
    fn crop_drops_now_empty_members() {
        let mut d = Domain::from_finished_blocks(vec![Block::new(0, 10), Block::new(500, 10)]);
        d.crop(&Block::new(0, 20));
        assert_eq!(d.blocks(), &[Block::new(0, 10)]);
    }

    #[test]
    fn crop_by_file_size_truncates_tail() {
        let mut d = Domain::single(Block::new(0, 1000));
        d.crop_by_file_size(100);
        assert_eq!(d.blocks(), &[Block::new(0, 100)]);
    }

    #[test]
    fn breaks_block_by_detects_interior_boundary() {
        let d = Domain::from_finished_blocks(vec![Block::new(0, 50), Block::new(100, 50)]);
        assert_eq!(d.breaks_block_by(&Block::new(0, 200)), Some(50));
    }

    #[test]
    fn breaks_block_by_none_when_aligned() {
        let d = Domain::single(Block::new(0, 100));
        assert_eq!(d.breaks_block_by(&Block::new(0, 100)), None);
    }
}
