//! Command-line surface: `RescueArgs` (a `clap::Parser` derive covering the
//! rescue engine's flag table) plus the small helpers that turn a parsed
//! value into a [`crate::rescue::RescueOptions`] or a [`Mode`] dispatch.

use std::path::PathBuf;

use clap::Parser;

use crate::block::Status;
use crate::rescue::RescueOptions;

#[derive(Parser, Debug)]
#[command(name = "ddrescue-rs", version, about = "Block-level data recovery engine")]
pub struct RescueArgs {
    /// Source file or device.
    pub infile: PathBuf,
    /// Destination file or device.
    pub outfile: PathBuf,
    /// Mapfile tracking recovery progress; omit to run without persistence.
    pub mapfile: Option<PathBuf>,

    /// Minimum read rate (B/s) below which a read is considered slow.
    #[arg(short = 'a', long = "min-read-rate")]
    pub min_read_rate: Option<i64>,
    /// Maximum error rate (B/s) before aborting.
    #[arg(short = 'E', long = "max-error-rate")]
    pub max_error_rate: Option<i64>,
    /// Mark non-trimmed and non-scraped areas non-tried again.
    #[arg(short = 'A', long = "try-again")]
    pub try_again: bool,
    /// Hardware block size in bytes.
    #[arg(short = 'b', long = "sector-size", default_value_t = 512)]
    pub hardbs: i64,
    /// Use binary (1024-based) prefixes instead of SI (1000-based) ones.
    #[arg(short = 'B', long = "binary-prefixes")]
    pub binary_prefixes: bool,
    /// Cluster size in sectors (softbs = cluster * hardbs).
    #[arg(short = 'c', long = "cluster-size", default_value_t = 128)]
    pub cluster: i64,
    /// Do not grow the rescue domain beyond the mapfile's extent.
    #[arg(short = 'C', long = "complete-only")]
    pub complete_only: bool,
    /// Use direct I/O on the source.
    #[arg(short = 'd', long = "direct")]
    pub o_direct_in: bool,
    /// fsync the destination after every write.
    #[arg(short = 'D', long = "synchronous")]
    pub synchronous: bool,
    /// Maximum number of error areas (`+N` counts only newly found errors).
    #[arg(short = 'e', long = "max-errors")]
    pub max_errors: Option<String>,
    /// Overwrite an existing non-regular destination.
    #[arg(short = 'f', long = "force")]
    pub force: bool,
    /// Fill mode: overwrite the given status types with a pattern.
    #[arg(short = 'F', long = "fill")]
    pub fill_types: Option<String>,
    /// Generate mode: rebuild a mapfile from an existing output file.
    #[arg(short = 'g', long = "generate-mode")]
    pub generate: bool,
    /// Starting read position in the source.
    #[arg(short = 'i', long = "input-position")]
    pub input_position: Option<i64>,
    /// Starting write position in the destination.
    #[arg(short = 'o', long = "output-position")]
    pub output_position: Option<i64>,
    /// Verify the source size matches the mapfile's extent.
    #[arg(short = 'I', long = "verify-input-size")]
    pub verify_input_size: bool,
    /// Initial skip size on a slow or failed read.
    #[arg(short = 'K', long = "skip-size")]
    pub skipbs: Option<i64>,
    /// Maximum number of mapfile entries (informational; not enforced).
    #[arg(short = 'l', long = "log-events")]
    pub max_mapfile_entries: Option<i64>,
    /// Restrict the domain to the finished blocks recorded in this mapfile.
    #[arg(short = 'm', long = "domain-mapfile")]
    pub domain_mapfile: Option<PathBuf>,
    /// Mark non-scraped and bad-sector areas non-trimmed again.
    #[arg(short = 'M', long = "retrim")]
    pub retrim: bool,
    /// Skip the trim, scrape, and retry phases.
    #[arg(short = 'n', long = "no-split")]
    pub no_split: bool,
    /// Preallocate the destination to its expected final size.
    #[arg(short = 'p', long = "preallocate")]
    pub preallocate: bool,
    /// Suppress progress output.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
    /// Print extra progress detail.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    /// Maximum retry passes over bad sectors (-1 = unlimited).
    #[arg(short = 'r', long = "max-retries")]
    pub max_retries: Option<i32>,
    /// Run passes back to front.
    #[arg(short = 'R', long = "reverse")]
    pub reverse: bool,
    /// Maximum size of the rescue domain.
    #[arg(short = 's', long = "domain-size")]
    pub domain_size: Option<i64>,
    /// Treat all-zero reads as sparse holes in the destination.
    #[arg(short = 'S', long = "sparse")]
    pub sparse: bool,
    /// Truncate the destination before starting.
    #[arg(short = 't', long = "truncate")]
    pub truncate: bool,
    /// Timeout after this many seconds without a successful read (accepts
    /// `N`, `N.M`, or `N` suffixed with `s`/`m`/`h`/`d`).
    #[arg(short = 'T', long = "timeout")]
    pub timeout: Option<String>,
    /// Extend the destination to at least this many bytes on completion.
    #[arg(short = 'x', long = "extend-outfile")]
    pub extend_outfile: Option<i64>,
    /// Rate/read log paths, for auditing.
    #[arg(long = "rate-log")]
    pub rate_log: Option<PathBuf>,
    #[arg(long = "read-log")]
    pub read_log: Option<PathBuf>,
}

/// Which top-level driver to run, derived from `-F`/`-g`.
pub enum Mode {
    Rescue,
    Fill(Vec<Status>),
    Generate,
}

impl RescueArgs {
    pub fn mode(&self) -> Result<Mode, String> {
        match (&self.fill_types, self.generate) {
            (Some(_), true) => Err("-F and -g are mutually exclusive".into()),
            (Some(types), false) => Ok(Mode::Fill(parse_fill_types(types)?)),
            (None, true) => Ok(Mode::Generate),
            (None, false) => Ok(Mode::Rescue),
        }
    }

    /// Parse `-T`'s duration string into whole seconds.
    pub fn timeout_secs(&self) -> Result<Option<i64>, String> {
        self.timeout.as_deref().map(parse_timeout).transpose()
    }

    /// Parse `-e`'s `[+]N` form into `(max_errors, new_errors_only)`.
    pub fn max_errors_value(&self) -> Result<Option<(i32, bool)>, String> {
        match &self.max_errors {
            None => Ok(None),
            Some(s) => {
                let (new_only, digits) = match s.strip_prefix('+') {
                    Some(rest) => (true, rest),
                    None => (false, s.as_str()),
                };
                let n: i32 = digits
                    .parse()
                    .map_err(|_| format!("invalid -e value: {s}"))?;
                Ok(Some((n, new_only)))
            }
        }
    }

    /// Build a `RescueOptions` from the parsed flags.
    pub fn to_rescue_options(&self) -> Result<RescueOptions, String> {
        let mut opts = RescueOptions {
            hardbs: self.hardbs,
            cluster: self.cluster,
            max_error_rate: self.max_error_rate,
            min_read_rate: self.min_read_rate,
            timeout: self.timeout_secs()?,
            max_errors: None,
            max_retries: self.max_retries.or(Some(0)),
            skipbs: self.skipbs.unwrap_or(crate::rescue::DEFAULT_SKIPBS),
            max_skipbs: crate::rescue::MAX_SKIPBS,
            complete_only: self.complete_only,
            new_errors_only: false,
            retrim: self.retrim,
            try_again: self.try_again,
            sparse: self.sparse,
            reverse: self.reverse,
            unidirectional: false,
            cpass_bitset: 0b111,
            exit_on_error: false,
            notrim: self.no_split,
            noscrape: self.no_split,
            reopen_on_error: false,
            // No CLI flag enables verify-on-error in this surface (mirrors
            // the original's ddrescue.cc, which never sets it either); the
            // engine still implements the behavior for callers that build
            // `RescueOptions` directly. `-I`/`verify_input_size` is a
            // distinct check (source size vs. mapfile extent), applied in
            // `main.rs` before the engine ever runs.
            verify_on_error: false,
            synchronous: self.synchronous,
            pause: 0,
            o_direct_in: self.o_direct_in,
            min_outfile_size: self.extend_outfile.unwrap_or(-1),
        };
        if self.no_split {
            opts.max_retries = Some(0);
        }
        if let Some((n, new_only)) = self.max_errors_value()? {
            opts.max_errors = Some(n);
            opts.new_errors_only = new_only;
        }
        Ok(opts)
    }
}

fn parse_fill_types(s: &str) -> Result<Vec<Status>, String> {
    let mut types = Vec::new();
    for c in s.chars() {
        match Status::from_symbol(c) {
            Some(st) => types.push(st),
            None => return Err(format!("invalid fill type '{c}'")),
        }
    }
    if types.is_empty() {
        return Err("-F requires at least one status type".into());
    }
    Ok(types)
}

fn parse_timeout(s: &str) -> Result<i64, String> {
    let s = s.trim();
    let (number_part, unit) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], c),
        _ => (s, 's'),
    };
    let value: f64 = match number_part.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num
                .parse()
                .map_err(|_| format!("invalid -T value: {s}"))?;
            let den: f64 = den
                .parse()
                .map_err(|_| format!("invalid -T value: {s}"))?;
            if den == 0.0 {
                return Err(format!("invalid -T value: {s}"));
            }
            num / den
        }
        None => number_part
            .parse()
            .map_err(|_| format!("invalid -T value: {s}"))?,
    };
    let factor = match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        'd' => 86_400.0,
        other => return Err(format!("invalid -T unit '{other}'")),
    };
    Ok((value * factor).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_plain_seconds() {
        assert_eq!(parse_timeout("90").unwrap(), 90);
    }

    #[test]
    fn parse_timeout_with_unit() {
        assert_eq!(parse_timeout("2h").unwrap(), 7200);
        assert_eq!(parse_timeout("1.5m").unwrap(), 90);
    }

    #[test]
    fn parse_timeout_accepts_fraction() {
        assert_eq!(parse_timeout("5/2h").unwrap(), 9000);
        assert_eq!(parse_timeout("1/4").unwrap(), 0);
        assert!(parse_timeout("1/0h").is_err());
    }

    #[test]
    fn parse_fill_types_rejects_unknown_symbol() {
        assert!(parse_fill_types("z").is_err());
    }

    #[test]
    fn parse_fill_types_collects_known_symbols() {
        assert_eq!(
            parse_fill_types("-/").unwrap(),
            vec![Status::BadSector, Status::NonScraped]
        );
    }
}
