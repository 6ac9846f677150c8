//! Persistent per-run CSV log
//!
//! One file per invocation, `rPOP_<MM-DD-YYYY_HH-MM-SS>_<nanos>.csv` in local time,
//! with a header row followed by one row per completed run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use crate::error::{Result, RpopError};
use crate::smoothing::{FilterTriple, FwhmTriple};

pub const HEADER: &str = "Filename,EstimatedFWHMx,EstimatedFWHMy,EstimatedFWHMz,\
FWHMfilterappliedx,FWHMfilterappliedy,FWHMfilterappliedz,AFNIEstimationRerunMod";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRecord {
    /// Smoothed output file name
    pub filename: String,
    pub estimated: FwhmTriple,
    pub filter: FilterTriple,
    /// Whether the smoothness estimate came from a modified re-run
    pub rerun_modified: bool,
}

impl RunRecord {
    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            csv_field(&self.filename),
            self.estimated.x,
            self.estimated.y,
            self.estimated.z,
            self.filter.x,
            self.filter.y,
            self.filter.z,
            if self.rerun_modified { 1 } else { 0 },
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[derive(Clone, Debug)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file in `dir` named after the wall-clock time of `now`
    pub fn timestamped<Tz: TimeZone>(dir: &Path, now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: Display,
    {
        Self::new(dir.join(format!("rPOP_{}.csv", timestamp(now))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is new or empty.
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        let needs_header = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RpopError::io(&self.path, e))?;

        let mut text = String::new();
        if needs_header {
            text.push_str(HEADER);
            text.push('\n');
        }
        text.push_str(&record.csv_row());
        text.push('\n');
        file.write_all(text.as_bytes()).map_err(|e| RpopError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), "run record appended");
        Ok(())
    }
}

/// `MM-DD-YYYY_HH-MM-SS_nnnnnnnnn` in the time zone of `now`
pub fn timestamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    now.format("%m-%d-%Y_%H-%M-%S_%f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike, Utc};

    fn record(name: &str) -> RunRecord {
        RunRecord {
            filename: name.to_string(),
            estimated: FwhmTriple::new(8.0, 9.0, 11.0),
            filter: FilterTriple::new(6.0, 4.5, 0.0),
            rerun_modified: false,
        }
    }

    #[test]
    fn test_timestamp_format() {
        let t = Utc.with_ymd_and_hms(2001, 9, 9, 1, 46, 40).unwrap().with_nanosecond(123).unwrap();
        assert_eq!(timestamp(&t), "09-09-2001_01-46-40_000000123");
        let leap = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        assert_eq!(timestamp(&leap), "02-29-2024_12-00-00_000000000");
    }

    #[test]
    fn test_timestamp_uses_wall_clock_of_zone() {
        // 04:59:59 UTC on New Year's Day is still New Year's Eve at UTC-5
        let zone = FixedOffset::west_opt(5 * 3600).unwrap();
        let eve = zone.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(timestamp(&eve), "12-31-1999_23-59-59_000000000");
        assert_eq!(timestamp(&eve.with_timezone(&Utc)), "01-01-2000_04-59-59_000000000");
    }

    #[test]
    fn test_csv_row() {
        assert_eq!(record("s_pet.nii.gz").csv_row(), "s_pet.nii.gz,8,9,11,6,4.5,0,0");
        assert!(record("a,b.nii").csv_row().starts_with("\"a,b.nii\","));
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        let log = RunLog::timestamped(dir.path(), &now);
        assert_eq!(
            log.path().file_name().unwrap().to_str().unwrap(),
            "rPOP_02-29-2024_12-00-00_000000000.csv"
        );

        log.append(&record("first.nii.gz")).unwrap();
        log.append(&record("second.nii.gz")).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("first.nii.gz,"));
        assert!(lines[2].starts_with("second.nii.gz,"));
        assert_eq!(lines[0].split(',').count(), lines[1].split(',').count());
    }
}
