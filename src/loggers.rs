//! Append-only text loggers the engine writes one line to per progress
//! update, independent of the mapfile: a rate logger (one line per update
//! tick) and a read logger (one line per attempted chunk, plus timestamped
//! status messages).

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::numfmt::{format_num, format_time_hms};

const RATE_LIMIT: i64 = 99_999;

/// Writes `<time> <ipos> <current_rate> <average_rate> <errors> <errsize>`
/// lines, one per rate-update tick.
pub struct RateLogger {
    file: Option<File>,
}

impl RateLogger {
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let file = match path {
            None => None,
            Some(p) => {
                let mut f = File::create(p)?;
                writeln!(
                    f,
                    "   Time       Ipos     Current_rate  Average_rate  Errors    Errsize"
                )?;
                Some(f)
            }
        };
        Ok(RateLogger { file })
    }

    pub fn print_line(
        &mut self,
        time: i64,
        ipos: i64,
        c_rate: i64,
        a_rate: i64,
        errors: u32,
        errsize: i64,
    ) -> io::Result<()> {
        if let Some(f) = &mut self.file {
            writeln!(
                f,
                "{}  0x{ipos:010X} {:>9}B/s {:>9}B/s  {errors:>7} {:>9}B",
                format_time_hms(time),
                format_num(c_rate, RATE_LIMIT, false),
                format_num(a_rate, RATE_LIMIT, false),
                format_num(errsize, RATE_LIMIT, false),
            )?;
        }
        Ok(())
    }
}

/// Writes `<ipos> <size> <copied_size> <error_size>` lines, one per
/// attempted read, plus free-form timestamped status messages.
pub struct ReadLogger {
    file: Option<File>,
}

impl ReadLogger {
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let file = match path {
            None => None,
            Some(p) => {
                let mut f = File::create(p)?;
                writeln!(f, "    Ipos         Size    Copied_size  Error_size")?;
                Some(f)
            }
        };
        Ok(ReadLogger { file })
    }

    pub fn print_line(
        &mut self,
        ipos: i64,
        size: i64,
        copied_size: i64,
        error_size: i64,
    ) -> io::Result<()> {
        if let Some(f) = &mut self.file {
            writeln!(
                f,
                "0x{ipos:010X} {:>9}B {:>9}B {:>9}B",
                format_num(size, RATE_LIMIT, false),
                format_num(copied_size, RATE_LIMIT, false),
                format_num(error_size, RATE_LIMIT, false),
            )?;
        }
        Ok(())
    }

    pub fn print_msg(&mut self, time: i64, msg: &str) -> io::Result<()> {
        if let Some(f) = &mut self.file {
            writeln!(f, "Time {}  {msg}", format_time_hms(time))?;
        }
        Ok(())
    }

    pub fn print_time(&mut self, time: i64) -> io::Result<()> {
        if let Some(f) = &mut self.file {
            if time > 0 {
                writeln!(f, "Time {}", format_time_hms(time))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_logger_without_path_is_a_no_op() {
        let mut logger = RateLogger::open(None).unwrap();
        logger.print_line(0, 0, 0, 0, 0, 0).unwrap();
    }

    #[test]
    fn read_logger_writes_header_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.log");
        {
            let mut logger = ReadLogger::open(Some(&path)).unwrap();
            logger.print_line(0, 512, 512, 0).unwrap();
            logger.print_msg(5, "Initial status").unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("    Ipos"));
        assert!(contents.contains("0x0000000000"));
        assert!(contents.contains("Initial status"));
    }
}
