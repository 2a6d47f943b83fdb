//! `RescueEngine` — the multi-pass state machine driving a rescue run:
//! three `copy_non_tried` passes (optionally alternating direction), then
//! `trim_errors`, `scrape_errors`, and up to `max_retries` `copy_errors`
//! passes, all operating through one [`StatusMap`].

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::block::{Block, PassState, Status};
use crate::io_primitives::{block_is_zero, interrupted, read_block, set_signals, write_block};
use crate::loggers::{RateLogger, ReadLogger};
use crate::status_map::{StatusMap, StatusMapError};

use super::options::RescueOptions;

#[derive(Debug, Error)]
pub enum RescueError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("mapfile error: {0}")]
    Mapfile(#[from] crate::status_map::mapfile::MapfileError),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("{0}")]
    Fatal(String),
}

impl From<StatusMapError> for RescueError {
    fn from(e: StatusMapError) -> Self {
        match e {
            StatusMapError::Internal(msg) => RescueError::Internal(msg),
            StatusMapError::Mapfile(m) => RescueError::Mapfile(m),
        }
    }
}

/// Budget bits accumulated in `e_code`: rate, errors, timeout.
const E_RATE: u8 = 1;
const E_ERRORS: u8 = 2;
const E_TIMEOUT: u8 = 4;

/// Outcome of a finished (or interrupted) run, handed to `main.rs` to pick
/// an exit code.
#[derive(Debug, Clone)]
pub struct RescueReport {
    pub interrupted: bool,
    pub e_code: u8,
    pub errors: i32,
    pub finished_size: i64,
    pub bad_sector_size: i64,
    pub error_rate: i64,
}

impl RescueReport {
    pub fn budget_exceeded(&self) -> bool {
        self.e_code != 0
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A capped moving average of the last `window` samples, used to estimate
/// remaining time from a recent (not lifetime) read rate.
struct SlidingAverage {
    window: usize,
    samples: Vec<i64>,
    pos: usize,
}

impl SlidingAverage {
    fn new(window: usize) -> Self {
        SlidingAverage {
            window,
            samples: Vec::new(),
            pos: 0,
        }
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.pos = 0;
    }

    fn add_term(&mut self, term: i64) {
        if self.samples.len() < self.window {
            self.samples.push(term);
        } else {
            self.samples[self.pos] = term;
            self.pos = (self.pos + 1) % self.window;
        }
    }

    fn value(&self) -> i64 {
        if self.samples.is_empty() {
            0
        } else {
            self.samples.iter().sum::<i64>() / self.samples.len() as i64
        }
    }
}

/// Live counters and rate-update state, separated from the `StatusMap` so
/// `status_view.rs` can read a cheap snapshot without touching the sblock
/// vector.
pub struct EngineStatus {
    pub non_tried_size: i64,
    pub non_trimmed_size: i64,
    pub non_scraped_size: i64,
    pub bad_sector_size: i64,
    pub finished_size: i64,
    pub errors: i32,
    pub a_rate: i64,
    pub c_rate: i64,
    pub last_ipos: i64,
    pub offset: i64,
    pub elapsed: i64,
    pub since_last_success: i64,
    pub remaining: Option<i64>,
}

pub struct RescueEngine {
    map: StatusMap,
    opts: RescueOptions,
    ifile: File,
    ofile: File,
    iname: PathBuf,
    offset: i64,

    errors: i32,
    e_code: u8,
    error_rate: i64,
    sparse_size: i64,

    non_tried_size: i64,
    non_trimmed_size: i64,
    non_scraped_size: i64,
    bad_sector_size: i64,
    finished_size: i64,

    skip_size: i64,

    voe_ipos: i64,
    voe_buf: Vec<u8>,
    iobuf: Vec<u8>,

    a_rate: i64,
    c_rate: i64,
    first_size: i64,
    last_size: i64,
    last_ipos: i64,
    t0: i64,
    t1: i64,
    ts: i64,
    rates_updated: bool,
    first_post: bool,
    first_read: bool,
    sliding_avg: SlidingAverage,

    rate_logger: RateLogger,
    read_logger: ReadLogger,

    final_msg: Option<String>,
}

impl RescueEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        map: StatusMap,
        opts: RescueOptions,
        ifile: File,
        ofile: File,
        iname: PathBuf,
        offset: i64,
        rate_log: Option<&std::path::Path>,
        read_log: Option<&std::path::Path>,
    ) -> Result<Self, RescueError> {
        let hardbs = opts.hardbs.max(1) as usize;
        let alignment: usize = if opts.o_direct_in { 4096 } else { 1 };
        let mut engine = RescueEngine {
            map,
            sparse_size: if opts.sparse { 0 } else { -1 },
            skip_size: opts.skipbs,
            opts,
            ifile,
            ofile,
            iname,
            offset,
            errors: 0,
            e_code: 0,
            error_rate: 0,
            non_tried_size: 0,
            non_trimmed_size: 0,
            non_scraped_size: 0,
            bad_sector_size: 0,
            finished_size: 0,
            voe_ipos: -1,
            voe_buf: vec![0u8; hardbs],
            iobuf: vec![0u8; hardbs * 4 + alignment],
            a_rate: 0,
            c_rate: 0,
            first_size: 0,
            last_size: 0,
            last_ipos: 0,
            t0: 0,
            t1: 0,
            ts: 0,
            rates_updated: false,
            first_post: false,
            first_read: true,
            sliding_avg: SlidingAverage::new(30),
            rate_logger: RateLogger::open(rate_log)?,
            read_logger: ReadLogger::open(read_log)?,
            final_msg: None,
        };
        engine.initialize_sizes();
        if engine.opts.new_errors_only {
            if let Some(max_errors) = engine.opts.max_errors {
                engine.opts.max_errors = Some(max_errors + engine.errors);
            }
        }
        Ok(engine)
    }

    pub fn status(&self) -> EngineStatus {
        let remaining = {
            let s_rate = self.sliding_avg.value();
            if s_rate <= 0 {
                None
            } else {
                let retry_component = if self.opts.max_retries != Some(0) {
                    self.bad_sector_size
                } else {
                    0
                };
                let total = self.non_tried_size + self.non_trimmed_size + self.non_scraped_size
                    + retry_component;
                Some((total + s_rate - 1) / s_rate)
            }
        };
        EngineStatus {
            non_tried_size: self.non_tried_size,
            non_trimmed_size: self.non_trimmed_size,
            non_scraped_size: self.non_scraped_size,
            bad_sector_size: self.bad_sector_size,
            finished_size: self.finished_size,
            errors: self.errors,
            a_rate: self.a_rate,
            c_rate: self.c_rate,
            last_ipos: self.last_ipos,
            offset: self.offset,
            elapsed: self.t1 - self.t0,
            since_last_success: self.t1 - self.ts,
            remaining,
        }
    }

    /// Recompute the five size buckets and the error-area count from
    /// scratch; called once at startup and whenever an EOF truncates the
    /// sblock vector.
    fn initialize_sizes(&mut self) {
        self.non_tried_size = 0;
        self.non_trimmed_size = 0;
        self.non_scraped_size = 0;
        self.bad_sector_size = 0;
        self.finished_size = 0;
        self.errors = 0;
        let mut good = true;
        for sb in self.map.sblocks() {
            if !self.map.domain().includes_block(&sb.block()) {
                continue;
            }
            match sb.status() {
                Status::NonTried => {
                    self.non_tried_size += sb.size();
                    good = true;
                }
                Status::NonTrimmed => {
                    self.non_trimmed_size += sb.size();
                    good = true;
                }
                Status::NonScraped => {
                    self.non_scraped_size += sb.size();
                    good = true;
                }
                Status::BadSector => {
                    self.bad_sector_size += sb.size();
                    if good {
                        good = false;
                        self.errors += 1;
                    }
                }
                Status::Finished => {
                    self.finished_size += sb.size();
                    good = true;
                }
            }
        }
    }

    fn errors_or_timeout(&mut self) -> bool {
        if let Some(max_errors) = self.opts.max_errors {
            if self.errors > max_errors {
                self.e_code |= E_ERRORS;
            }
        }
        self.e_code != 0
    }

    fn slow_read(&self) -> bool {
        if self.t1 - self.t0 < 30 {
            return false;
        }
        match self.opts.min_read_rate {
            Some(rate) if rate > 0 => self.c_rate < rate && self.c_rate < self.a_rate / 2,
            Some(rate) if rate == 0 => self.c_rate < self.a_rate / 10,
            _ => false,
        }
    }

    fn reduce_min_read_rate(&mut self) {
        if let Some(rate) = self.opts.min_read_rate {
            if rate > 0 {
                self.opts.min_read_rate = Some(rate / 10);
            }
        }
    }

    fn change_chunk_status(&mut self, b: &Block, st: Status) -> Result<(), RescueError> {
        let old = self.sblock_status_before(b);
        let delta = self.map.change_chunk_status(b, st)?;
        self.errors += delta;
        if let Some(old_st) = old {
            if old_st != st {
                self.adjust_bucket(old_st, -b.size());
                self.adjust_bucket(st, b.size());
            }
        }
        Ok(())
    }

    fn sblock_status_before(&mut self, b: &Block) -> Option<Status> {
        self.map
            .sblocks()
            .iter()
            .find(|sb| sb.includes_block(b))
            .map(|sb| sb.status())
    }

    fn adjust_bucket(&mut self, st: Status, delta: i64) {
        match st {
            Status::NonTried => self.non_tried_size += delta,
            Status::NonTrimmed => self.non_trimmed_size += delta,
            Status::NonScraped => self.non_scraped_size += delta,
            Status::BadSector => self.bad_sector_size += delta,
            Status::Finished => self.finished_size += delta,
        }
    }

    fn update_rates(&mut self, force: bool) {
        if self.t0 == 0 {
            self.t0 = now();
            self.t1 = self.t0;
            self.ts = self.t0;
            self.first_size = self.finished_size;
            self.last_size = self.finished_size;
            self.rates_updated = true;
        }
        let mut t2 = now();
        if t2 < self.t1 {
            let delta = self.t0.min(self.t1 - t2);
            self.t0 -= delta;
            self.ts -= delta;
            self.t1 = t2;
        }
        if force && t2 <= self.t1 {
            t2 = self.t1 + 1;
        }
        if t2 > self.t1 {
            let denom = (t2 - self.t0).max(1);
            self.a_rate = (self.finished_size - self.first_size) / denom;
            let cdenom = (t2 - self.t1).max(1);
            self.c_rate = (self.finished_size - self.last_size) / cdenom;
            if self.e_code & E_TIMEOUT == 0 {
                if self.finished_size != self.last_size {
                    self.last_size = self.finished_size;
                    self.ts = t2;
                } else if let Some(timeout) = self.opts.timeout {
                    if t2 - self.ts > timeout && self.t1 > self.t0 {
                        self.e_code |= E_TIMEOUT;
                    }
                }
            }
            if let Some(max_rate) = self.opts.max_error_rate {
                if self.e_code & E_RATE == 0 {
                    self.error_rate /= cdenom;
                    if self.error_rate > max_rate {
                        self.e_code |= E_RATE;
                    } else {
                        self.error_rate = 0;
                    }
                }
            }
            self.t1 = t2;
            self.rates_updated = true;
        }
    }

    fn tick(&mut self, ipos: i64, msg: &str) {
        if ipos >= 0 {
            self.last_ipos = ipos;
        }
        if self.rates_updated || self.first_post {
            if self.first_post {
                self.sliding_avg.reset();
            } else {
                self.sliding_avg.add_term(self.c_rate);
            }
            let _ = self
                .rate_logger
                .print_line(self.t1 - self.t0, self.last_ipos, self.c_rate, self.a_rate, self.errors as u32, self.bad_sector_size);
            if !self.first_post {
                let _ = self.read_logger.print_time(self.t1 - self.t0);
            }
            self.rates_updated = false;
            self.first_post = false;
        }
        let _ = msg;
    }

    /// Read-modify-write a source chunk into the destination, handling
    /// O_DIRECT alignment padding, sparse detection, and verify-on-error.
    fn copy_block(&mut self, b: &Block) -> Result<(i64, i64), RescueError> {
        if b.size() <= 0 {
            return Err(RescueError::Internal("bad size copying a Block".into()));
        }
        let hardbs = self.opts.hardbs;
        let (copied_size, err) = if self.opts.o_direct_in {
            let pre = b.pos().rem_euclid(hardbs);
            let disp = b.end().rem_euclid(hardbs);
            let post = if disp > 0 { hardbs - disp } else { 0 };
            let size = (pre + b.size() + post) as usize;
            if size > self.iobuf.len() {
                self.iobuf.resize(size, 0);
            }
            let (raw, err) = read_block(&self.ifile, &mut self.iobuf[..size], b.pos() - pre);
            let mut copied = raw as i64 - pre.min(raw as i64);
            if copied > b.size() {
                copied = b.size();
            }
            if pre > 0 && copied > 0 {
                self.iobuf.copy_within(pre as usize..pre as usize + copied as usize, 0);
            }
            (copied, err)
        } else {
            let size = b.size() as usize;
            if size > self.iobuf.len() {
                self.iobuf.resize(size, 0);
            }
            let (n, err) = read_block(&self.ifile, &mut self.iobuf[..size], b.pos());
            (n as i64, err)
        };
        let error_size = if err.is_some() { b.size() - copied_size } else { 0 };

        if copied_size > 0 {
            let pos = b.pos() + self.offset;
            let buf = &self.iobuf[..copied_size as usize];
            if self.sparse_size >= 0 && block_is_zero(buf) {
                let end = pos + copied_size;
                if end > self.sparse_size {
                    self.sparse_size = end;
                }
            } else {
                let (written, werr) = write_block(&self.ofile, buf, pos);
                if werr.is_some() || written as i64 != copied_size {
                    self.final_msg = Some("Write error".into());
                    return Err(RescueError::Fatal("write error".into()));
                }
                if self.opts.synchronous {
                    let _ = self.ofile.sync_data();
                }
            }
        }

        let _ = self.read_logger.print_line(b.pos(), b.size(), copied_size, error_size);

        if self.opts.verify_on_error {
            if copied_size >= hardbs && b.pos().rem_euclid(hardbs) == 0 {
                self.voe_ipos = b.pos();
                self.voe_buf.copy_from_slice(&self.iobuf[..hardbs as usize]);
            } else if copied_size <= 0 && error_size > 0 && self.voe_ipos >= 0 {
                let mut check = vec![0u8; hardbs as usize];
                let (n, verr) = read_block(&self.ifile, &mut check, self.voe_ipos);
                if n as i64 != hardbs || verr.is_some() {
                    self.final_msg = Some("Input file no longer returns data".into());
                    return Err(RescueError::Fatal("verify-on-error read failed".into()));
                }
                if check != self.voe_buf {
                    self.final_msg = Some("Input file returns inconsistent data".into());
                    return Err(RescueError::Fatal("verify-on-error mismatch".into()));
                }
            }
        }
        Ok((copied_size, error_size))
    }

    /// `copy_and_update`: position, status-check, perform one `copy_block`,
    /// and fold the result back into the status map and size counters.
    /// Returns `Ok(true)` to keep going, `Ok(false)` if the caller should
    /// stop because of the interrupt flag (a clean stop, not an error).
    fn copy_and_update(
        &mut self,
        b: &Block,
        msg: &str,
        curr_status: PassState,
        forward: bool,
        partial_error_status: Status,
    ) -> Result<(i64, i64, bool), RescueError> {
        if self.first_post {
            if self.first_read {
                self.first_read = false;
            } else if self.opts.pause > 0 {
                std::thread::sleep(std::time::Duration::from_secs(self.opts.pause as u64));
                let t2 = now();
                if self.t1 < t2 {
                    self.t1 = t2;
                }
                self.ts = self.ts.min(self.t1);
            }
            self.map.set_current_status(curr_status);
            let _ = self.read_logger.print_msg(self.t1 - self.t0, msg);
        }
        self.map
            .set_current_pos(if forward { b.pos() } else { b.end() });
        self.tick(b.pos(), msg);
        if self.errors_or_timeout() {
            return Err(RescueError::Fatal("error/timeout budget exceeded".into()));
        }
        if interrupted() {
            return Ok((0, 0, false));
        }

        let (copied_size, error_size) = self.copy_block(b)?;

        if copied_size + error_size < b.size() {
            // EOF reached mid-block.
            let eof_pos = b.pos() + copied_size + error_size;
            if self.opts.complete_only {
                // Domain narrowing on EOF with --domain-logfile is left to
                // the caller that built the domain; nothing to do here.
            } else {
                self.map.truncate_vector(eof_pos);
            }
            self.initialize_sizes();
        }
        if copied_size > 0 {
            self.change_chunk_status(&Block::new(b.pos(), copied_size), Status::Finished)?;
        }
        if error_size > 0 {
            self.error_rate += error_size;
            let st = if error_size > self.opts.hardbs {
                partial_error_status
            } else {
                Status::BadSector
            };
            self.change_chunk_status(&Block::new(b.pos() + copied_size, error_size), st)?;
            if !self.iname.exists() {
                self.final_msg = Some("Input file disappeared".into());
                return Err(RescueError::Fatal("input file disappeared".into()));
            }
        }
        Ok((copied_size, error_size, true))
    }

    fn flush_mapfile(&mut self, force: bool) -> Result<(), RescueError> {
        self.map.flush(force).map_err(RescueError::from)
    }

    /// Run the three `copy_non_tried` passes, forward or reverse according
    /// to `opts.reverse`, alternating direction in between unless
    /// `unidirectional` is set.
    fn copy_non_tried(&mut self) -> Result<(), RescueError> {
        let mut forward = !self.opts.reverse;
        for pass in 1..=3u8 {
            if self.opts.cpass_bitset & (1 << (pass - 1)) != 0 {
                self.first_post = true;
                let label = format!(
                    "Copying non-tried blocks... Pass {pass} {}",
                    if forward { "(forwards)" } else { "(backwards)" }
                );
                let found = self.copy_non_tried_one_direction(&label, pass, forward)?;
                if !found {
                    // no-op: nothing in this pass, continue to next
                }
                self.reduce_min_read_rate();
            }
            if !self.opts.unidirectional {
                forward = !forward;
            }
        }
        Ok(())
    }

    fn copy_non_tried_one_direction(
        &mut self,
        msg: &str,
        pass: u8,
        forward: bool,
    ) -> Result<bool, RescueError> {
        let softbs = self.opts.softbs();
        let hardbs = self.opts.hardbs;
        let mut skip_size = self.opts.skipbs;
        let mut block_found = false;

        let mut cursor = if forward { Some(0i64) } else { Some(i64::MAX) };

        // Resume from current_pos on the first pass.
        if pass == 1 && self.map.current_status() == PassState::Copying {
            let resume_ok = if forward {
                self.map.domain().includes(self.map.current_pos())
            } else {
                self.map.domain().includes(self.map.current_pos() - 1)
            };
            if resume_ok {
                if forward {
                    let probe = self.map.find_chunk(Block::new(self.map.current_pos(), 1), Status::NonTried, hardbs);
                    if probe.size() > 0 {
                        cursor = Some(probe.pos());
                    }
                } else {
                    let probe = self.map.rfind_chunk(Block::new(self.map.current_pos() - 1, 1), Status::NonTried, hardbs);
                    if probe.size() > 0 {
                        cursor = Some(probe.end());
                    }
                }
            }
        }

        loop {
            let Some(c) = cursor else { break };
            if forward && c < 0 {
                break;
            }
            if !forward && c <= 0 {
                break;
            }
            let probe = if forward {
                Block::new(c, softbs)
            } else {
                Block::new(c - softbs, softbs)
            };
            let found = if forward {
                self.map.find_chunk(probe, Status::NonTried, softbs)
            } else {
                self.map.rfind_chunk(probe, Status::NonTried, softbs)
            };
            if found.size() <= 0 {
                break;
            }
            let changed_block = if forward { c != found.pos() } else { c != found.end() };
            if changed_block {
                skip_size = self.opts.skipbs;
            }
            cursor = Some(if forward { found.end() } else { found.pos() });
            block_found = true;

            let (_copied, error_size, keep_going) = self.copy_and_update(
                &found,
                msg,
                PassState::Copying,
                forward,
                Status::NonTrimmed,
            )?;
            if !keep_going {
                return Ok(block_found);
            }
            self.update_rates(false);
            if error_size > 0 && self.opts.exit_on_error {
                self.e_code |= E_ERRORS;
                return Err(RescueError::Fatal("exit-on-error after a read error".into()));
            }
            let c_now = cursor.unwrap();
            let c_continues = if forward { c_now >= 0 } else { c_now > 0 };
            if (error_size > 0 || self.slow_read()) && c_continues {
                if self.opts.reopen_on_error {
                    self.reopen_infile()?;
                }
                if self.opts.skipbs > 0 && pass <= 2 {
                    let skip_probe = if forward {
                        Block::new(c_now, skip_size)
                    } else {
                        Block::new(c_now - skip_size, skip_size)
                    };
                    let skip_found = if forward {
                        self.map.find_chunk(skip_probe, Status::NonTried, hardbs)
                    } else {
                        self.map.rfind_chunk(skip_probe, Status::NonTried, hardbs)
                    };
                    let aligned = if forward {
                        c_now == skip_found.pos()
                    } else {
                        c_now == skip_found.end()
                    };
                    if aligned && skip_found.size() > 0 {
                        cursor = Some(if forward { skip_found.end() } else { skip_found.pos() });
                    }
                    if skip_size <= self.opts.max_skipbs / 2 {
                        skip_size *= 2;
                    } else {
                        skip_size = self.opts.max_skipbs;
                    }
                }
            } else if _copied > 0 {
                skip_size = self.opts.skipbs;
            }
            self.flush_mapfile(false)?;
        }
        Ok(block_found)
    }

    fn reopen_infile(&mut self) -> Result<(), RescueError> {
        let f = File::options().read(true).open(&self.iname)?;
        self.ifile = f;
        Ok(())
    }

    /// Trim both edges of every `non_trimmed` area, hardbs-sector by
    /// hardbs-sector, stopping at the first error on each edge and marking
    /// whatever remains in the middle `non_scraped`.
    fn trim_errors(&mut self) -> Result<(), RescueError> {
        let reverse = self.opts.reverse;
        let msg = if reverse {
            "Trimming failed blocks... (backwards)"
        } else {
            "Trimming failed blocks... (forwards)"
        };
        self.first_post = true;
        let hardbs = self.opts.hardbs;

        let targets: Vec<Block> = self
            .map
            .sblocks()
            .iter()
            .filter(|sb| sb.status() == Status::NonTrimmed && self.map.domain().includes_block(&sb.block()))
            .map(|sb| sb.block())
            .collect();
        let targets: Vec<Block> = if reverse {
            targets.into_iter().rev().collect()
        } else {
            targets
        };

        for sb in targets {
            let mut pos = sb.pos();
            let mut end = sb.end();
            let mut error_found = false;
            while pos < end && !error_found {
                let mut b = Block::new(pos, hardbs.min(end - pos));
                if b.end() != end {
                    b.align_end(hardbs);
                }
                pos = b.end();
                let (_c, error_size, keep_going) =
                    self.copy_and_update(&b, msg, PassState::Trimming, true, Status::NonTrimmed)?;
                if !keep_going {
                    return Ok(());
                }
                if error_size > 0 {
                    error_found = true;
                }
                self.update_rates(false);
                self.flush_mapfile(false)?;
            }
            let mut error_found = false;
            while end > pos && !error_found {
                let size = hardbs.min(end - pos);
                let mut b = Block::new(end - size, size);
                if b.pos() != pos {
                    b.align_pos(hardbs);
                }
                end = b.pos();
                let (_c, error_size, keep_going) =
                    self.copy_and_update(&b, msg, PassState::Trimming, false, Status::NonTrimmed)?;
                if !keep_going {
                    return Ok(());
                }
                if error_size > 0 {
                    error_found = true;
                    if end > pos {
                        if let Some(sblock) = self
                            .map
                            .sblocks()
                            .iter()
                            .find(|s| s.includes(end - 1))
                            .copied()
                        {
                            if self.map.domain().includes_block(&sblock.block())
                                && sblock.status() == Status::NonTrimmed
                            {
                                self.change_chunk_status(&sblock.block(), Status::NonScraped)?;
                            }
                        }
                    }
                }
                self.update_rates(false);
                self.flush_mapfile(false)?;
            }
        }
        Ok(())
    }

    /// Read every `non_scraped` area sector by sector, front to back.
    fn scrape_errors(&mut self) -> Result<(), RescueError> {
        let reverse = self.opts.reverse;
        let msg = if reverse {
            "Scraping failed blocks... (backwards)"
        } else {
            "Scraping failed blocks... (forwards)"
        };
        self.first_post = true;
        let hardbs = self.opts.hardbs;

        let targets: Vec<Block> = self
            .map
            .sblocks()
            .iter()
            .filter(|sb| sb.status() == Status::NonScraped && self.map.domain().includes_block(&sb.block()))
            .map(|sb| sb.block())
            .collect();
        let targets: Vec<Block> = if reverse {
            targets.into_iter().rev().collect()
        } else {
            targets
        };

        for sb in targets {
            let mut pos = sb.pos();
            let end = sb.end();
            while pos < end {
                let mut b = Block::new(pos, hardbs.min(end - pos));
                if b.end() != end {
                    b.align_end(hardbs);
                }
                pos = b.end();
                let (_c, _e, keep_going) =
                    self.copy_and_update(&b, msg, PassState::Scraping, true, Status::NonScraped)?;
                if !keep_going {
                    return Ok(());
                }
                self.update_rates(false);
                self.flush_mapfile(false)?;
            }
        }
        Ok(())
    }

    /// Up to `max_retries` passes over every `bad_sector` area, one hardbs
    /// sector at a time.
    fn copy_errors(&mut self) -> Result<(), RescueError> {
        let max_retries = self.opts.max_retries;
        let mut forward = !self.opts.reverse;
        let mut retry = 1;
        loop {
            if let Some(max) = max_retries {
                if retry > max {
                    break;
                }
            }
            self.first_post = true;
            let msg = format!(
                "Retrying bad sectors... Retry {retry} {}",
                if forward { "(forwards)" } else { "(backwards)" }
            );
            self.copy_errors_one_direction(&msg, retry, forward)?;
            if !self.opts.unidirectional {
                forward = !forward;
            }
            retry += 1;
        }
        Ok(())
    }

    fn copy_errors_one_direction(
        &mut self,
        msg: &str,
        retry: i32,
        forward: bool,
    ) -> Result<(), RescueError> {
        let hardbs = self.opts.hardbs;
        let mut cursor = if forward { Some(0i64) } else { Some(i64::MAX) };

        if retry == 1 && self.map.current_status() == PassState::Retrying {
            let resume_ok = if forward {
                self.map.domain().includes(self.map.current_pos())
            } else {
                self.map.domain().includes(self.map.current_pos() - 1)
            };
            if resume_ok {
                if forward {
                    let probe = self.map.find_chunk(Block::new(self.map.current_pos(), 1), Status::BadSector, hardbs);
                    if probe.size() > 0 {
                        cursor = Some(probe.pos());
                    }
                } else {
                    let probe = self.map.rfind_chunk(Block::new(self.map.current_pos() - 1, 1), Status::BadSector, hardbs);
                    if probe.size() > 0 {
                        cursor = Some(probe.end());
                    }
                }
            }
        }

        loop {
            let Some(c) = cursor else { break };
            if forward && c < 0 {
                break;
            }
            if !forward && c <= 0 {
                break;
            }
            let probe = if forward {
                Block::new(c, hardbs)
            } else {
                Block::new(c - hardbs, hardbs)
            };
            let found = if forward {
                self.map.find_chunk(probe, Status::BadSector, hardbs)
            } else {
                self.map.rfind_chunk(probe, Status::BadSector, hardbs)
            };
            if found.size() <= 0 {
                break;
            }
            cursor = Some(if forward { found.end() } else { found.pos() });
            let (_c, _e, keep_going) =
                self.copy_and_update(&found, msg, PassState::Retrying, forward, Status::BadSector)?;
            if !keep_going {
                return Ok(());
            }
            self.update_rates(false);
            self.flush_mapfile(false)?;
        }
        Ok(())
    }

    /// Grow the output file to `min_outfile_size`/the pending sparse end
    /// marker, whichever is larger, with a single trailing zero byte write.
    fn extend_outfile_size(&mut self) -> Result<(), RescueError> {
        let min_size = self.opts.min_outfile_size.max(self.sparse_size);
        if min_size <= 0 {
            return Ok(());
        }
        let current = self.ofile.metadata()?.len() as i64;
        if min_size > current {
            let (n, err) = write_block(&self.ofile, &[0u8], min_size - 1);
            if n != 1 || err.is_some() {
                return Err(RescueError::Fatal("error extending output file size".into()));
            }
            let _ = self.ofile.sync_data();
        }
        Ok(())
    }

    /// Drive the whole run: copy, trim, scrape, retry, in that order,
    /// skipping any phase the domain already satisfies or the options
    /// disable. Installs the signal handlers for the duration of the call.
    pub fn run(&mut self) -> Result<RescueReport, RescueError> {
        set_signals()?;

        let copy_pending = self.non_tried_size > 0;
        let trim_pending = copy_pending || self.non_trimmed_size > 0;
        let scrape_pending = trim_pending || self.non_scraped_size > 0;

        self.update_rates(false);
        let mut interrupted_run = false;
        let mut hard_error: Option<RescueError> = None;

        if copy_pending && !self.errors_or_timeout() {
            match self.copy_non_tried() {
                Ok(()) if interrupted() => interrupted_run = true,
                Ok(()) => {}
                Err(e) => hard_error = Some(e),
            }
        }
        if hard_error.is_none()
            && !interrupted_run
            && !self.opts.notrim
            && trim_pending
            && !self.errors_or_timeout()
        {
            match self.trim_errors() {
                Ok(()) if interrupted() => interrupted_run = true,
                Ok(()) => {}
                Err(e) => hard_error = Some(e),
            }
        }
        if hard_error.is_none()
            && !interrupted_run
            && !self.opts.noscrape
            && scrape_pending
            && !self.errors_or_timeout()
        {
            match self.scrape_errors() {
                Ok(()) if interrupted() => interrupted_run = true,
                Ok(()) => {}
                Err(e) => hard_error = Some(e),
            }
        }
        if hard_error.is_none()
            && !interrupted_run
            && self.opts.max_retries != Some(0)
            && !self.errors_or_timeout()
        {
            match self.copy_errors() {
                Ok(()) if interrupted() => interrupted_run = true,
                Ok(()) => {}
                Err(e) => hard_error = Some(e),
            }
        }

        if !self.rates_updated {
            self.update_rates(true);
        }

        if let Some(e) = hard_error {
            return Err(e);
        }

        if !interrupted_run {
            self.map.set_current_status(PassState::Finished);
        }
        self.extend_outfile_size()?;
        self.map.compact();
        self.flush_mapfile(true)?;

        if let Some(msg) = self.final_msg.take() {
            return Err(RescueError::Fatal(msg));
        }

        Ok(RescueReport {
            interrupted: interrupted_run,
            e_code: self.e_code,
            errors: self.errors,
            finished_size: self.finished_size,
            bad_sector_size: self.bad_sector_size,
            error_rate: self.error_rate,
        })
    }
}

