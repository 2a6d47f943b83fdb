use std::fs::{self, File, OpenOptions};

use ddrescue_rs::domain::Domain;
use ddrescue_rs::rescue::{RescueEngine, RescueOptions};
use ddrescue_rs::status_map::StatusMap;
use ddrescue_rs::{PassState, Status};

fn open_rw(path: &std::path::Path) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .unwrap()
}

#[test]
fn clean_copy_rescues_every_byte() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("source.img");
    let out_path = dir.path().join("dest.img");
    let map_path = dir.path().join("rescue.map");

    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    fs::write(&in_path, &data).unwrap();

    let map = StatusMap::new(4096, Domain::everything(), Some(&map_path), 512, false, false, "test".into())
        .unwrap();
    let opts = RescueOptions {
        hardbs: 512,
        cluster: 2,
        ..RescueOptions::default()
    };
    let ifile = File::open(&in_path).unwrap();
    let ofile = open_rw(&out_path);
    let mut engine = RescueEngine::new(map, opts, ifile, ofile, in_path.clone(), 0, None, None).unwrap();
    let report = engine.run().unwrap();

    assert!(!report.interrupted);
    assert!(!report.budget_exceeded());
    assert_eq!(report.finished_size, 4096);
    assert_eq!(fs::read(&out_path).unwrap(), data);

    let saved = ddrescue_rs::status_map::mapfile::read_mapfile(&map_path).unwrap().unwrap();
    assert_eq!(saved.sblocks.len(), 1);
    assert_eq!(saved.sblocks[0].status(), Status::Finished);
    assert_eq!(saved.sblocks[0].size(), 4096);
}

#[test]
fn resume_from_mapfile_reaches_clean_copy_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("source.img");
    let out_path = dir.path().join("dest.img");
    let map_path = dir.path().join("rescue.map");

    let data: Vec<u8> = (0..4096u32).map(|i| (i % 200) as u8).collect();
    fs::write(&in_path, &data).unwrap();

    // Simulate an interrupted first run: the first 1024 bytes are already
    // finished and persisted, the rest is still non-tried.
    {
        let mut map = StatusMap::new(4096, Domain::everything(), Some(&map_path), 512, false, false, "test".into())
            .unwrap();
        map.change_chunk_status(&ddrescue_rs::Block::new(0, 1024), Status::Finished)
            .unwrap();
        map.set_current_pos(1024);
        map.set_current_status(PassState::Copying);
        map.flush(true).unwrap();
    }
    {
        let mut buf = vec![0u8; 4096];
        buf[..1024].copy_from_slice(&data[..1024]);
        fs::write(&out_path, &buf).unwrap();
    }

    let map = StatusMap::new(4096, Domain::everything(), Some(&map_path), 512, false, false, "test".into())
        .unwrap();
    assert_eq!(map.current_pos(), 1024);

    let opts = RescueOptions {
        hardbs: 512,
        cluster: 2,
        ..RescueOptions::default()
    };
    let ifile = File::open(&in_path).unwrap();
    let ofile = open_rw(&out_path);
    let mut engine = RescueEngine::new(map, opts, ifile, ofile, in_path.clone(), 0, None, None).unwrap();
    let report = engine.run().unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.finished_size, 4096);
    assert_eq!(fs::read(&out_path).unwrap(), data);
}

#[test]
fn trim_scrape_retry_passes_recover_a_previously_bad_region() {
    // Simulate a second invocation where a prior run left a 512-byte region
    // split across non_trimmed/non_scraped/bad_sector (as trim_errors and
    // scrape_errors would leave it after a read failure) and the source is
    // now fully readable again: every pass should converge the whole
    // domain to `finished`.
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("source.img");
    let out_path = dir.path().join("dest.img");

    let data: Vec<u8> = (0..4096u32).map(|i| (i % 233) as u8).collect();
    fs::write(&in_path, &data).unwrap();

    let mut map = StatusMap::new(4096, Domain::everything(), None, 512, false, true, "test".into())
        .unwrap();
    map.change_chunk_status(&ddrescue_rs::Block::new(0, 1024), Status::Finished)
        .unwrap();
    map.change_chunk_status(&ddrescue_rs::Block::new(1024, 512), Status::NonTrimmed)
        .unwrap();
    map.change_chunk_status(&ddrescue_rs::Block::new(1536, 512), Status::NonScraped)
        .unwrap();
    map.change_chunk_status(&ddrescue_rs::Block::new(2048, 512), Status::BadSector)
        .unwrap();
    map.change_chunk_status(&ddrescue_rs::Block::new(2560, 1536), Status::Finished)
        .unwrap();

    {
        let mut buf = vec![0u8; 4096];
        buf[..1024].copy_from_slice(&data[..1024]);
        buf[2560..].copy_from_slice(&data[2560..]);
        fs::write(&out_path, &buf).unwrap();
    }

    let opts = RescueOptions {
        hardbs: 512,
        cluster: 2,
        max_retries: Some(2),
        ..RescueOptions::default()
    };
    let ifile = File::open(&in_path).unwrap();
    let ofile = open_rw(&out_path);
    let mut engine = RescueEngine::new(map, opts, ifile, ofile, in_path.clone(), 0, None, None).unwrap();
    let report = engine.run().unwrap();

    assert!(!report.interrupted);
    assert!(!report.budget_exceeded());
    assert_eq!(report.finished_size, 4096);
    assert_eq!(report.bad_sector_size, 0);
    assert_eq!(fs::read(&out_path).unwrap(), data);
}

#[test]
fn sparse_mode_elides_zero_writes_but_preserves_content() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("source.img");
    let out_path = dir.path().join("dest.img");

    let size = 1 << 20;
    let mut data = vec![0u8; size];
    data[524_288..524_288 + 512].fill(0x5A);
    fs::write(&in_path, &data).unwrap();

    let map = StatusMap::new(size as i64, Domain::everything(), None, 512, false, true, "test".into())
        .unwrap();
    let opts = RescueOptions {
        hardbs: 512,
        cluster: 8,
        sparse: true,
        ..RescueOptions::default()
    };
    let ifile = File::open(&in_path).unwrap();
    let ofile = open_rw(&out_path);
    let mut engine = RescueEngine::new(map, opts, ifile, ofile, in_path.clone(), 0, None, None).unwrap();
    let report = engine.run().unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.finished_size, size as i64);
    assert_eq!(fs::read(&out_path).unwrap(), data);
}
