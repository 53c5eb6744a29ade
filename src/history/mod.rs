// src/history/mod.rs

use anyhow::{anyhow, Context, Result};
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// A cohort whose quarter conversion failed, as recorded in the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedCohort {
    pub number: usize,
    /// 1-based flat position of the cohort's first quarter.
    pub start_index: usize,
}

impl fmt::Display for FailedCohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.number, self.start_index)
    }
}

/// Plain-text log of failed cohorts, one `cohort_number,start_index` per line.
pub struct FailedCohortLog {
    path: PathBuf,
}

impl FailedCohortLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All recorded entries, or `None` when no log has been written.
    pub fn read(&self) -> Result<Option<Vec<FailedCohort>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        parse_entries(&text)
            .map(Some)
            .with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Append one entry, creating the log (and its directory) if needed.
    pub fn append(&self, entry: FailedCohort) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {:?}", parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

fn parse_entries(text: &str) -> Result<Vec<FailedCohort>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (number, start) = line
            .split_once(',')
            .ok_or_else(|| anyhow!("line {}: expected `cohort,start`, got `{}`", i + 1, line))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<usize>()
                .with_context(|| format!("line {}: `{}` is not a number", i + 1, s.trim()))
        };
        out.push(FailedCohort {
            number: parse(number)?,
            start_index: parse(start)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_log_reads_as_none() -> Result<()> {
        let tmp = tempdir()?;
        let log = FailedCohortLog::new(tmp.path().join("failed_cohorts.txt"));
        assert!(log.read()?.is_none());
        Ok(())
    }

    #[test]
    fn append_then_read() -> Result<()> {
        let tmp = tempdir()?;
        let log = FailedCohortLog::new(tmp.path().join("output").join("failed_cohorts.txt"));
        log.append(FailedCohort {
            number: 3,
            start_index: 11,
        })?;
        log.append(FailedCohort {
            number: 7,
            start_index: 31,
        })?;
        let entries = log.read()?.unwrap();
        assert_eq!(
            entries,
            vec![
                FailedCohort {
                    number: 3,
                    start_index: 11
                },
                FailedCohort {
                    number: 7,
                    start_index: 31
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn tolerates_whitespace_and_blank_lines() -> Result<()> {
        let entries = parse_entries(" 12 , 56 \n\n4,16\n")?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].start_index, 56);
        Ok(())
    }

    #[test]
    fn malformed_line_names_its_number() {
        let err = parse_entries("1,1\nfoo\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
