//! Readers for the TEMPO and TEMPO2 clock-correction text formats.
//!
//! **TEMPO2** (`*.clk`):
//!
//! ```text
//! # UTC(GBT) UTC(GPS) 1
//! # free-form comments
//! 51000.0  1.5e-6
//! 51010.0  1.7e-6  anything after the two numbers is a comment
//! ```
//!
//! The first line names the source and target timescales and an optional badness
//! level. Corrections are in seconds.
//!
//! **TEMPO** (`time_<site>.dat`): a two-line standard header followed by fixed
//! columns `MJD[0:9]`, `corr1[9:21]`, `corr2[21:33]`, site code at column 34.
//! The correction is `corr2 − corr1` in microseconds, with the historical
//! `corr1 > 800 → corr1 − 818.8` adjustment.
//!
//! In both formats leading rows with MJD 0 are placeholders and are dropped.
//! Some distributed files also end with a placeholder row far in the future;
//! [`ClockReadOptions::bogus_last_correction`] drops it.

use std::fs;

use camino::Utf8Path;
use nom::{
    bytes::complete::take_till1,
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map_res, opt},
    number::complete::double,
    sequence::{delimited, preceded},
    IResult, Parser,
};
use tracing::debug;

use super::ClockFile;
use crate::pulsefit_errors::PulsefitError;

/// Supported clock file layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockFormat {
    Tempo,
    Tempo2,
}

/// Options shared by the clock file readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockReadOptions {
    /// TEMPO site code; rows for other sites are skipped. Ignored for TEMPO2.
    pub site: Option<char>,
    /// The last row is a placeholder and is dropped.
    pub bogus_last_correction: bool,
}

impl ClockReadOptions {
    pub fn site(site: char) -> Self {
        ClockReadOptions {
            site: Some(site),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_bogus_last_correction(mut self) -> Self {
        self.bogus_last_correction = true;
        self
    }
}

pub(super) const TEMPO_HEADER: [&str; 2] = [
    "MJD EECO-REF NIST-REF NS DATE COMMENTS",
    "========= ======== ======== == ======== ========",
];

fn timescale_word(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c.is_whitespace()).parse(input)
}

/// `# FROM TO [badness] [extra]`
fn parse_tempo2_header(input: &str) -> IResult<&str, (&str, &str, Option<u32>)> {
    let (input, _) = (space0, char('#'), space0).parse(input)?;
    let (input, from) = timescale_word(input)?;
    let (input, to) = preceded(space1, timescale_word).parse(input)?;
    let (input, badness) =
        opt(preceded(space1, map_res(digit1, str::parse::<u32>))).parse(input)?;
    Ok((input, (from, to, badness)))
}

/// `mjd correction [trailing comment]`
fn parse_tempo2_row(input: &str) -> IResult<&str, (f64, f64)> {
    let (input, mjd) = preceded(space0, double).parse(input)?;
    let (input, corr) = preceded(space1, double).parse(input)?;
    let (input, _) = space0(input)?;
    Ok((input, (mjd, corr)))
}

fn fixed_float(field: &str) -> Option<f64> {
    let parsed: IResult<&str, f64> = all_consuming(delimited(space0, double, space0)).parse(field);
    parsed.ok().map(|(_, v)| v)
}

/// Substring of `line` between byte columns `start..end`, clipped to the line.
fn column(line: &str, start: usize, end: usize) -> &str {
    let len = line.len();
    line.get(start.min(len)..end.min(len)).unwrap_or("")
}

fn drop_placeholders(mjd: &mut Vec<f64>, corr: &mut Vec<f64>, bogus_last_correction: bool) {
    if bogus_last_correction {
        mjd.pop();
        corr.pop();
    }
    let zeros = mjd.iter().take_while(|&&m| m == 0.0).count();
    mjd.drain(..zeros);
    corr.drain(..zeros);
}

/// Parse the content of a TEMPO2-format clock file.
///
/// Lines that are neither comments nor `mjd corr` rows are kept as comments,
/// matching the permissive behaviour of the format's reference reader.
pub fn parse_tempo2_clock(
    name: &str,
    content: &str,
    options: &ClockReadOptions,
) -> Result<ClockFile, PulsefitError> {
    let mut lines = content.lines();
    let header = lines.next().unwrap_or_default();
    let (_, (from, to, badness)) =
        parse_tempo2_header(header).map_err(|_| PulsefitError::InvalidClockFile {
            name: name.to_string(),
            reason: format!(
                "header line must start with # and contain two time scales: {header:?}"
            ),
        })?;

    let mut mjd = Vec::new();
    let mut corr = Vec::new();
    let mut comments = Vec::new();

    for line in lines {
        if line.trim_start().starts_with('#') {
            comments.push(line.trim().to_string());
            continue;
        }
        match parse_tempo2_row(line) {
            Ok((trailing, (m, c))) => {
                mjd.push(m);
                corr.push(c);
                if !trailing.trim().is_empty() {
                    comments.push(trailing.trim().to_string());
                }
            }
            Err(_) => {
                if !line.trim().is_empty() {
                    comments.push(line.trim().to_string());
                }
            }
        }
    }
    drop_placeholders(&mut mjd, &mut corr, options.bogus_last_correction);

    debug!(
        clock_file = name,
        from,
        to,
        badness = badness.unwrap_or(1),
        rows = mjd.len(),
        "loaded TEMPO2 clock file"
    );

    Ok(ClockFile::new(name, mjd, corr)?
        .with_timescales(from, to)
        .with_comments(comments))
}

/// Parse the content of a TEMPO-format clock file.
///
/// Arguments
/// -----------------
/// * `name`: label of the resulting [`ClockFile`].
/// * `content`: the file content.
/// * `options`: site filter and placeholder handling. Without a site every
///   row is used.
///
/// Return
/// ----------
/// * A [`ClockFile`] with corrections in seconds.
pub fn parse_tempo_clock(
    name: &str,
    content: &str,
    options: &ClockReadOptions,
) -> Result<ClockFile, PulsefitError> {
    let site = options.site;
    let mut seen_header = 0;
    let mut mjd = Vec::new();
    let mut corr = Vec::new();
    let mut comments = Vec::new();

    for line in content.lines() {
        if line.starts_with('#') {
            comments.push(line.trim_end().to_string());
            continue;
        }

        if seen_header < 2 {
            let words = line
                .split_whitespace()
                .map(|w| w.to_uppercase())
                .collect::<Vec<_>>();
            let expected = TEMPO_HEADER[seen_header].split_whitespace().collect::<Vec<_>>();
            if words != expected {
                return Err(PulsefitError::InvalidClockFile {
                    name: name.to_string(),
                    reason: "TEMPO-format clock files should start with a standard header".into(),
                });
            }
            seen_header += 1;
            continue;
        }

        if line.starts_with("INCLUDE") {
            return Err(PulsefitError::InvalidClockFile {
                name: name.to_string(),
                reason: "INCLUDE directives are not supported".into(),
            });
        }

        let row_mjd = fixed_float(column(line, 0, 9))
            .filter(|&m| m == 0.0 || (39000.0..=100000.0).contains(&m));
        let corr1 = fixed_float(column(line, 9, 21));
        let corr2 = fixed_float(column(line, 21, 33));
        let row_site = column(line, 34, 35).chars().next().map(|c| c.to_ascii_lowercase());

        if let Some(site) = site {
            if row_site != Some(site.to_ascii_lowercase()) {
                continue;
            }
        }

        let Some(m) = row_mjd else {
            comments.push(line.trim_end().to_string());
            continue;
        };
        if corr1.is_none() && corr2.is_none() {
            comments.push(line.trim_end().to_string());
            continue;
        }

        let mut c1 = corr1.unwrap_or(0.0);
        let c2 = corr2.unwrap_or(0.0);
        if c1 > 800.0 {
            c1 -= 818.8;
        }
        mjd.push(m);
        corr.push((c2 - c1) * 1e-6);
    }
    drop_placeholders(&mut mjd, &mut corr, options.bogus_last_correction);

    debug!(clock_file = name, site = ?site, rows = mjd.len(), "loaded TEMPO clock file");

    Ok(ClockFile::new(name, mjd, corr)?.with_comments(comments))
}

/// Read a clock file from disk.
///
/// The file stem is used as the clock file name.
pub fn read_clock_file(
    path: &Utf8Path,
    format: ClockFormat,
    options: &ClockReadOptions,
) -> Result<ClockFile, PulsefitError> {
    let content = fs::read_to_string(path)?;
    let name = path.file_name().unwrap_or(path.as_str());
    match format {
        ClockFormat::Tempo2 => parse_tempo2_clock(name, &content, options),
        ClockFormat::Tempo => parse_tempo_clock(name, &content, options),
    }
}

#[cfg(test)]
mod clock_reader_test {
    use super::*;
    use crate::clock::OutOfRangePolicy;
    use approx::assert_abs_diff_eq;

    const TEMPO2_GBT: &str = "# UTC(GBT) UTC(GPS) 2
# GBT maser offsets
0.0 0.0
55000.0  1.0e-6
55010.0  2.0e-6  reset after maintenance
not a row
55020.0  2.5e-6
";

    const TEMPO_AO: &str = "   MJD       EECO-REF    NIST-REF NS      DATE    COMMENTS
=========    ========    ======== ==    ========  ========
# Arecibo
 50000.00     819.000       0.500 3
 50010.00       1.000       2.000 3
 50010.00       3.000       2.000 1
 50020.00       0.000       4.000 3
";

    #[test]
    fn test_parse_tempo2() {
        let clk = parse_tempo2_clock("gbt2gps.clk", TEMPO2_GBT, &ClockReadOptions::default()).unwrap();
        assert_eq!(clk.timescales(), Some(("UTC(GBT)", "UTC(GPS)")));
        assert_eq!(clk.mjd(), &[55000.0, 55010.0, 55020.0]);
        assert_eq!(clk.correction(), &[1.0e-6, 2.0e-6, 2.5e-6]);
        assert!(clk.comments().iter().any(|c| c == "reset after maintenance"));
        assert!(clk.comments().iter().any(|c| c == "not a row"));
    }

    #[test]
    fn test_parse_tempo2_bad_header() {
        let err = parse_tempo2_clock("bad", "55000.0 1.0e-6\n", &ClockReadOptions::default()).unwrap_err();
        assert!(matches!(err, PulsefitError::InvalidClockFile { .. }));
    }

    #[test]
    fn test_parse_tempo_site_filter() {
        let clk = parse_tempo_clock("time_ao.dat", TEMPO_AO, &ClockReadOptions::site('3')).unwrap();
        assert_eq!(clk.mjd(), &[50000.0, 50010.0, 50020.0]);
        // 819 > 800 → 0.2; 0.5 - 0.2 = 0.3 µs
        assert_abs_diff_eq!(clk.correction()[0], 0.3e-6, epsilon = 1e-15);
        assert_abs_diff_eq!(clk.correction()[1], 1.0e-6, epsilon = 1e-15);
        assert_abs_diff_eq!(clk.correction()[2], 4.0e-6, epsilon = 1e-15);

        let v = clk.evaluate(50015.0, OutOfRangePolicy::Error).unwrap();
        assert_abs_diff_eq!(v, 2.5e-6, epsilon = 1e-15);
    }

    #[test]
    fn test_parse_tempo_all_sites() {
        let clk = parse_tempo_clock("time_ao.dat", TEMPO_AO, &ClockReadOptions::default()).unwrap();
        assert_eq!(clk.mjd().len(), 4);
        assert_abs_diff_eq!(clk.correction()[2], -1.0e-6, epsilon = 1e-15);
    }

    #[test]
    fn test_parse_tempo_missing_header() {
        let err = parse_tempo_clock("bad", " 50000.00 1.0 2.0 3\n", &ClockReadOptions::default()).unwrap_err();
        assert!(matches!(err, PulsefitError::InvalidClockFile { .. }));
    }

    #[test]
    fn test_bogus_last_correction_is_dropped() {
        let content = "# UTC(AO) UTC(GPS)\n0.0 0.0\n55000.0 1.0e-6\n55010.0 2.0e-6\n99999.0 0.0\n";
        let kept = parse_tempo2_clock("ao2gps.clk", content, &ClockReadOptions::default()).unwrap();
        assert_eq!(kept.mjd(), &[55000.0, 55010.0, 99999.0]);

        let options = ClockReadOptions::default().with_bogus_last_correction();
        let clk = parse_tempo2_clock("ao2gps.clk", content, &options).unwrap();
        assert_eq!(clk.mjd(), &[55000.0, 55010.0]);
        assert_eq!(clk.correction(), &[1.0e-6, 2.0e-6]);

        let options = ClockReadOptions::site('3').with_bogus_last_correction();
        let tempo = parse_tempo_clock("time_ao.dat", TEMPO_AO, &options).unwrap();
        assert_eq!(tempo.mjd(), &[50000.0, 50010.0]);
    }
}
