//! Property tests for the invariants a `StatusMap` must hold under any
//! sequence of public mutators: strict ordering, gap-freeness, and
//! `change_chunk_status`/`compact` idempotence.

use proptest::prelude::*;

use ddrescue_rs::domain::Domain;
use ddrescue_rs::status_map::StatusMap;
use ddrescue_rs::{Block, Status};

const MAP_SIZE: i64 = 4096;

fn fresh_map() -> StatusMap {
    StatusMap::new(MAP_SIZE, Domain::everything(), None, 1, false, true, "test".into()).unwrap()
}

fn assert_well_formed(map: &StatusMap) {
    let sblocks = map.sblocks();
    assert!(!sblocks.is_empty());
    let mut prev_end: Option<i64> = None;
    for sb in sblocks {
        assert!(sb.pos() >= 0, "negative pos {}", sb.pos());
        assert!(sb.size() >= 0, "negative size {}", sb.size());
        assert!(sb.end() <= ddrescue_rs::MAX, "end overflows MAX");
        if let Some(end) = prev_end {
            assert_eq!(sb.pos(), end, "gap or overlap between sblocks");
        }
        prev_end = Some(sb.end());
    }
}

fn status_of(status_idx: u8) -> Status {
    match status_idx % 5 {
        0 => Status::NonTried,
        1 => Status::NonTrimmed,
        2 => Status::NonScraped,
        3 => Status::BadSector,
        _ => Status::Finished,
    }
}

proptest! {
    /// Any sequence of `change_chunk_status` calls over sub-blocks of a
    /// fixed-size map leaves the sblock vector strictly ordered and
    /// gap-free.
    #[test]
    fn change_chunk_status_preserves_well_formedness(
        ops in prop::collection::vec((0i64..MAP_SIZE, 1i64..64, 0u8..5), 0..200)
    ) {
        let mut map = fresh_map();
        for (pos, size, st) in ops {
            let size = size.min(MAP_SIZE - pos);
            if size <= 0 {
                continue;
            }
            // change_chunk_status requires the target to lie within one
            // sblock; split it first so any sub-range is addressable.
            let _ = map.split_sblock_by(pos);
            let end = (pos + size).min(MAP_SIZE);
            let _ = map.split_sblock_by(end);
            let _ = map.change_chunk_status(&Block::new(pos, end - pos), status_of(st));
            assert_well_formed(&map);
        }
    }

    /// `change_chunk_status(b, st)` applied twice in a row is a no-op: the
    /// second call changes nothing further.
    #[test]
    fn repeated_change_chunk_status_is_idempotent(
        pos in 0i64..MAP_SIZE, size in 1i64..512, st in 0u8..5
    ) {
        let mut map = fresh_map();
        let size = size.min(MAP_SIZE - pos);
        prop_assume!(size > 0);
        let status = status_of(st);

        map.split_sblock_by(pos).unwrap();
        map.split_sblock_by((pos + size).min(MAP_SIZE)).unwrap();
        let b = Block::new(pos, size);

        map.change_chunk_status(&b, status).unwrap();
        let after_first: Vec<_> = map.sblocks().to_vec();

        let delta = map.change_chunk_status(&b, status).unwrap();
        assert_eq!(delta, 0);
        assert_eq!(map.sblocks(), after_first.as_slice());
    }

    /// `compact` is idempotent and leaves no two adjacent sblocks sharing a
    /// status.
    #[test]
    fn compact_is_idempotent_and_fully_merged(
        ops in prop::collection::vec((0i64..MAP_SIZE, 1i64..64, 0u8..5), 0..100)
    ) {
        let mut map = fresh_map();
        for (pos, size, st) in ops {
            let size = size.min(MAP_SIZE - pos);
            if size <= 0 {
                continue;
            }
            let _ = map.split_sblock_by(pos);
            let end = (pos + size).min(MAP_SIZE);
            let _ = map.split_sblock_by(end);
            let _ = map.change_chunk_status(&Block::new(pos, end - pos), status_of(st));
        }
        map.compact();
        let once = map.sblocks().to_vec();
        for pair in once.windows(2) {
            assert_ne!(pair[0].status(), pair[1].status(), "adjacent equal-status sblocks after compact");
        }
        map.compact();
        assert_eq!(map.sblocks(), once.as_slice());
    }

    /// Writing a map to a mapfile and reading it back reproduces the same
    /// sblock vector, current position, and current status.
    #[test]
    fn mapfile_roundtrip_preserves_state(
        ops in prop::collection::vec((0i64..MAP_SIZE, 1i64..64, 0u8..5), 0..50)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.map");
        let mut map = StatusMap::new(
            MAP_SIZE,
            Domain::everything(),
            Some(&path),
            1,
            false,
            true,
            "test".into(),
        )
        .unwrap();
        for (pos, size, st) in ops {
            let size = size.min(MAP_SIZE - pos);
            if size <= 0 {
                continue;
            }
            let _ = map.split_sblock_by(pos);
            let end = (pos + size).min(MAP_SIZE);
            let _ = map.split_sblock_by(end);
            let _ = map.change_chunk_status(&Block::new(pos, end - pos), status_of(st));
        }
        map.flush(true).unwrap();

        let reread = StatusMap::new(
            MAP_SIZE,
            Domain::everything(),
            Some(&path),
            1,
            false,
            true,
            "test".into(),
        )
        .unwrap();
        assert_eq!(reread.sblocks(), map.sblocks());
    }
}
