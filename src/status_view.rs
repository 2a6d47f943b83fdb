//! A plain, line-at-a-time status renderer: one line appended to stdout per
//! update instead of the original's ANSI cursor-up redraw and hex/ASCII
//! preview pane (dropped; see the overview notes on terminal rendering).

use std::io::{self, Write};

use crate::numfmt::{format_num, format_time};
use crate::rescue::EngineStatus;

/// Render one `EngineStatus` snapshot as a single human-readable line.
pub fn render(status: &EngineStatus) -> String {
    let ipos = status.last_ipos + status.offset;
    let remaining = match status.remaining {
        Some(r) => format_time(r),
        None => "n/a".into(),
    };
    format!(
        "ipos {:>12}  non-tried {:>10}  non-trimmed {:>10}  non-scraped {:>10}  \
         bad-sector {:>10}  rescued {:>10}  errors {:>6}  rate {:>8}/s  \
         elapsed {:>8}  remaining {:>8}",
        format_num(ipos, 99999, true),
        format_num(status.non_tried_size, 99999, true),
        format_num(status.non_trimmed_size, 99999, true),
        format_num(status.non_scraped_size, 99999, true),
        format_num(status.bad_sector_size, 99999, true),
        format_num(status.finished_size, 99999, true),
        status.errors,
        format_num(status.c_rate, 99999, true),
        format_time(status.elapsed),
        remaining,
    )
}

/// Write one rendered line to `out`, terminated with a newline.
pub fn print_status(out: &mut impl Write, status: &EngineStatus) -> io::Result<()> {
    writeln!(out, "{}", render(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EngineStatus {
        EngineStatus {
            non_tried_size: 1000,
            non_trimmed_size: 0,
            non_scraped_size: 0,
            bad_sector_size: 512,
            finished_size: 2048,
            errors: 1,
            a_rate: 100,
            c_rate: 200,
            last_ipos: 4096,
            offset: 0,
            elapsed: 90,
            since_last_success: 5,
            remaining: Some(30),
        }
    }

    #[test]
    fn render_includes_every_field() {
        let line = render(&sample());
        assert!(line.contains("4096") || line.contains("4 Ki") || line.contains("4.00 Ki"));
        assert!(line.contains("errors"));
        assert!(line.contains("remaining"));
    }

    #[test]
    fn render_handles_no_remaining_estimate() {
        let mut s = sample();
        s.remaining = None;
        let line = render(&s);
        assert!(line.contains("n/a"));
    }

    #[test]
    fn print_status_writes_one_newline_terminated_line() {
        let mut buf = Vec::new();
        print_status(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
    }
}
