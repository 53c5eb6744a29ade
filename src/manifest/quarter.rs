// src/manifest/quarter.rs

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

static QUARTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})_T([1-4])$").expect("quarter pattern should be valid"));

/// One survey quarter, written `YYYY_Tq` (e.g. `2007_T1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quarter {
    pub year: u16,
    pub quarter: u8,
}

impl Quarter {
    pub fn new(year: u16, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(anyhow!("quarter must be 1..=4, got {}", quarter));
        }
        Ok(Self { year, quarter })
    }

    pub fn next(self) -> Self {
        if self.quarter == 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }

    /// `2007_T1` + `dta` → `2007_T1.dta`
    pub fn file_name(self, extension: &str) -> String {
        format!("{}.{}", self, extension)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_T{}", self.year, self.quarter)
    }
}

impl FromStr for Quarter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = QUARTER_RE
            .captures(s.trim())
            .ok_or_else(|| anyhow!("`{}` is not a quarter name (expected YYYY_Tq)", s))?;
        let year = caps[1].parse()?;
        let quarter = caps[2].parse()?;
        Quarter::new(year, quarter)
    }
}

impl TryFrom<String> for Quarter {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Quarter> for String {
    fn from(q: Quarter) -> Self {
        q.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() -> Result<()> {
        let q: Quarter = "2019_T4".parse()?;
        assert_eq!(q, Quarter::new(2019, 4)?);
        assert_eq!(q.to_string(), "2019_T4");
        assert_eq!(q.next().to_string(), "2020_T1");
        assert_eq!(q.file_name("parquet"), "2019_T4.parquet");
        Ok(())
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["2019_T5", "2019T1", "19_T1", "2019_T1.dta", ""] {
            assert!(bad.parse::<Quarter>().is_err(), "{} should not parse", bad);
        }
    }
}
