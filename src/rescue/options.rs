//! `RescueOptions` — the flag bag a [`super::RescueEngine`] runs with,
//! filled in by `cli.rs` from the command line.

/// Default size to skip past on a read error when `skipbs` is not
/// overridden (64 KiB, as in the original).
pub const DEFAULT_SKIPBS: i64 = 65_536;
/// Upper bound the adaptive skip size is clamped to (1 GiB).
pub const MAX_SKIPBS: i64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct RescueOptions {
    /// Sector size in bytes.
    pub hardbs: i64,
    /// Number of sectors read per I/O request (`softbs = cluster * hardbs`).
    pub cluster: i64,
    /// Abort once the error rate (bytes/s) exceeds this, if set.
    pub max_error_rate: Option<i64>,
    /// Abort (and mark slow) once the current rate falls below this.
    pub min_read_rate: Option<i64>,
    /// Abort once this many seconds pass with no successful read.
    pub timeout: Option<i64>,
    /// Abort once more than this many error areas have been found.
    pub max_errors: Option<i32>,
    /// How many retry passes `copy_errors` performs; `None` = unbounded,
    /// `Some(0)` = skip retries entirely.
    pub max_retries: Option<i32>,
    /// Initial size to skip past on an error during `copy_non_tried`.
    pub skipbs: i64,
    /// Upper bound the adaptive skip size grows to.
    pub max_skipbs: i64,
    /// Only work within blocks already present in a logfile read with
    /// `--domain-logfile` (limits the effective domain instead of
    /// extending it).
    pub complete_only: bool,
    /// Count only newly discovered errors against `max_errors`.
    pub new_errors_only: bool,
    /// Re-mark `non_scraped`/`bad_sector` areas as `non_trimmed` at start.
    pub retrim: bool,
    /// Re-mark `non_scraped`/`non_trimmed` areas as `non_tried` at start.
    pub try_again: bool,
    /// Treat all-zero reads as sparse holes (skip the write, extend a
    /// pending sparse-write end marker instead).
    pub sparse: bool,
    /// Run passes back to front.
    pub reverse: bool,
    /// Do not alternate direction between the three `copy_non_tried`
    /// passes.
    pub unidirectional: bool,
    /// Bitset selecting which of the three `copy_non_tried` passes to run
    /// (bit 0 = pass 1, bit 1 = pass 2, bit 2 = pass 3).
    pub cpass_bitset: u8,
    /// Abort on the first read error instead of continuing.
    pub exit_on_error: bool,
    /// Skip the trim phase.
    pub notrim: bool,
    /// Skip the scrape phase.
    pub noscrape: bool,
    /// Reopen the input file after an error or a slow read.
    pub reopen_on_error: bool,
    /// Verify that a re-read of the last good sector still matches after an
    /// error, to catch inconsistent (not just failing) reads.
    pub verify_on_error: bool,
    /// fsync the output file after every write.
    pub synchronous: bool,
    /// Seconds to sleep between passes on request.
    pub pause: i64,
    /// Use O_DIRECT on the input file, with the accompanying alignment and
    /// scratch-buffer padding that requires.
    pub o_direct_in: bool,
    /// Minimum output file size to extend to on finish (sparse/-x option),
    /// or `-1` to leave the file's natural size.
    pub min_outfile_size: i64,
}

impl Default for RescueOptions {
    fn default() -> Self {
        RescueOptions {
            hardbs: 512,
            cluster: 128,
            max_error_rate: None,
            min_read_rate: None,
            timeout: None,
            max_errors: None,
            max_retries: Some(0),
            skipbs: DEFAULT_SKIPBS,
            max_skipbs: MAX_SKIPBS,
            complete_only: false,
            new_errors_only: false,
            retrim: false,
            try_again: false,
            sparse: false,
            reverse: false,
            unidirectional: false,
            cpass_bitset: 0b111,
            exit_on_error: false,
            notrim: false,
            noscrape: false,
            reopen_on_error: false,
            verify_on_error: false,
            synchronous: false,
            pause: 0,
            o_direct_in: false,
            min_outfile_size: -1,
        }
    }
}

impl RescueOptions {
    pub fn softbs(&self) -> i64 {
        self.cluster * self.hardbs
    }

    /// Round `size` up to the next multiple of `hardbs`.
    pub fn round_up_to_hardbs(&self, size: i64) -> i64 {
        if size % self.hardbs == 0 {
            size
        } else {
            size - (size % self.hardbs) + self.hardbs
        }
    }
}
