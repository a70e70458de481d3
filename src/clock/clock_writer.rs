//! Writers for the TEMPO and TEMPO2 clock-correction text formats.
//!
//! Both produce files that [`super::clock_reader`] reads back to the same
//! table, up to the precision of the format: TEMPO2 rows keep every digit,
//! TEMPO rows hold MJDs to 0.01 day and corrections to 1 ns.

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use hifitime::Epoch;
use tracing::debug;

use super::clock_reader::{ClockFormat, TEMPO_HEADER};
use super::ClockFile;
use crate::pulsefit_errors::PulsefitError;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn comment_line(comment: &str) -> String {
    if comment.starts_with('#') {
        comment.to_string()
    } else {
        format!("# {comment}")
    }
}

/// `dd-Mon-yy` civil date of a UTC MJD, as in the DATE column of TEMPO files.
fn tempo_date(mjd: f64) -> String {
    let (year, month, day, ..) = Epoch::from_mjd_utc(mjd).to_gregorian_utc();
    let month = MONTHS[usize::from(month.clamp(1, 12)) - 1];
    format!("{day:02}-{month}-{:02}", year.rem_euclid(100))
}

/// Write `clock` in TEMPO2 format.
///
/// The header names the file's timescale pair; stored comments follow as
/// `#` lines. Values are written with the shortest representation that parses
/// back to the same `f64`.
///
/// Errors
/// ----------
/// * [`PulsefitError::InvalidClockFile`] if the file declares no timescales.
/// * [`PulsefitError::IoError`] on write failures.
pub fn write_tempo2_clock<W: Write>(clock: &ClockFile, out: &mut W) -> Result<(), PulsefitError> {
    let (from, to) = clock.timescales().ok_or_else(|| PulsefitError::InvalidClockFile {
        name: clock.name().to_string(),
        reason: "a TEMPO2 clock file needs a timescale pair for its header".into(),
    })?;
    writeln!(out, "# {from} {to}")?;
    for comment in clock.comments() {
        writeln!(out, "{}", comment_line(comment))?;
    }
    for (mjd, corr) in clock.mjd().iter().zip(clock.correction()) {
        writeln!(out, "{mjd} {corr:e}")?;
    }
    Ok(())
}

/// Write `clock` in TEMPO format for the one-character site code `site`.
///
/// Corrections go in the `NIST-REF` column in microseconds, with a zero
/// `EECO-REF` column so that no offset adjustment applies on reading.
///
/// Errors
/// ----------
/// * [`PulsefitError::InvalidClockFile`] if `site` is not a printable ASCII
///   character, or an MJD does not fit the nine-character column.
/// * [`PulsefitError::IoError`] on write failures.
pub fn write_tempo_clock<W: Write>(
    clock: &ClockFile,
    site: char,
    out: &mut W,
) -> Result<(), PulsefitError> {
    let invalid = |reason: String| PulsefitError::InvalidClockFile {
        name: clock.name().to_string(),
        reason,
    };
    if !site.is_ascii_graphic() {
        return Err(invalid(format!("invalid TEMPO site code {site:?}")));
    }
    if let Some(&mjd) = clock.mjd().iter().find(|m| !(0.0..100000.0).contains(*m)) {
        return Err(invalid(format!("MJD {mjd} does not fit a TEMPO clock file")));
    }

    writeln!(out, "   MJD       EECO-REF    NIST-REF NS      DATE    COMMENTS")?;
    writeln!(out, "{}", TEMPO_HEADER[1])?;
    for comment in clock.comments() {
        writeln!(out, "{}", comment_line(comment))?;
    }
    for (&mjd, &corr) in clock.mjd().iter().zip(clock.correction()) {
        let corr_us = corr * 1e6;
        writeln!(out, "{mjd:9.2}{:12.3}{corr_us:12.3} {site}    {}", 0.0, tempo_date(mjd))?;
    }
    Ok(())
}

/// Write a clock file to disk in the given format.
///
/// `site` is required for [`ClockFormat::Tempo`] and ignored otherwise.
pub fn write_clock_file(
    clock: &ClockFile,
    path: &Utf8Path,
    format: ClockFormat,
    site: Option<char>,
) -> Result<(), PulsefitError> {
    let mut out = BufWriter::new(File::create(path)?);
    match (format, site) {
        (ClockFormat::Tempo2, _) => write_tempo2_clock(clock, &mut out)?,
        (ClockFormat::Tempo, Some(site)) => write_tempo_clock(clock, site, &mut out)?,
        (ClockFormat::Tempo, None) => {
            return Err(PulsefitError::InvalidClockFile {
                name: clock.name().to_string(),
                reason: "a TEMPO clock file needs a site code".into(),
            })
        }
    }
    out.flush()?;
    debug!(clock_file = clock.name(), %path, ?format, rows = clock.mjd().len(), "wrote clock file");
    Ok(())
}

#[cfg(test)]
mod clock_writer_test {
    use super::*;
    use crate::clock::clock_reader::{parse_tempo2_clock, parse_tempo_clock, ClockReadOptions};
    use approx::assert_abs_diff_eq;

    fn gbt() -> ClockFile {
        ClockFile::new(
            "gbt2gps",
            vec![55000.0, 55010.25, 55010.25, 55020.5],
            vec![1.5e-6, 2.0e-6, -3.125e-6, 2.0000000000123e-6],
        )
        .unwrap()
        .with_timescales("UTC(GBT)", "UTC(GPS)")
        .with_comments(vec!["maser swap".into(), "# from the site log".into()])
    }

    fn written(write: impl FnOnce(&mut Vec<u8>) -> Result<(), PulsefitError>) -> String {
        let mut buf = Vec::new();
        write(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_tempo2_write_then_read() {
        let clock = gbt();
        let text = written(|out| write_tempo2_clock(&clock, out));
        assert!(text.starts_with("# UTC(GBT) UTC(GPS)\n"));

        let back = parse_tempo2_clock("gbt2gps", &text, &ClockReadOptions::default()).unwrap();
        assert_eq!(back.timescales(), Some(("UTC(GBT)", "UTC(GPS)")));
        assert_eq!(back.mjd(), clock.mjd());
        assert_eq!(back.correction(), clock.correction());
        assert_eq!(back.comments(), &["# maser swap".to_string(), "# from the site log".to_string()]);
    }

    #[test]
    fn test_tempo2_needs_timescales() {
        let clock = ClockFile::new("bare", vec![55000.0], vec![0.0]).unwrap();
        let mut buf = Vec::new();
        let err = write_tempo2_clock(&clock, &mut buf).unwrap_err();
        assert!(matches!(err, PulsefitError::InvalidClockFile { .. }));
    }

    #[test]
    fn test_tempo_write_then_read() {
        let clock = gbt();
        let text = written(|out| write_tempo_clock(&clock, '1', out));
        let row = text.lines().find(|l| l.starts_with(" 55000.00")).unwrap();
        assert_eq!(&row[9..21], "       0.000");
        assert_eq!(&row[21..33], "       1.500");
        assert_eq!(&row[34..35], "1");
        assert!(row.ends_with("18-Jun-09"));

        let back = parse_tempo_clock("time_gbt.dat", &text, &ClockReadOptions::site('1')).unwrap();
        assert_eq!(back.mjd(), clock.mjd());
        for (got, want) in back.correction().iter().zip(clock.correction()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 5e-13);
        }
        assert!(back.comments().iter().any(|c| c == "# maser swap"));

        let other_site = parse_tempo_clock("time_gbt.dat", &text, &ClockReadOptions::site('3')).unwrap();
        assert!(other_site.is_empty());
    }

    #[test]
    fn test_tempo_rejects_bad_site() {
        let mut buf = Vec::new();
        let err = write_tempo_clock(&gbt(), ' ', &mut buf).unwrap_err();
        assert!(matches!(err, PulsefitError::InvalidClockFile { .. }));
    }
}
