// src/manifest/mod.rs

pub mod quarter;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};

pub use quarter::Quarter;

/// Quarters observed per rotation cohort.
pub const QUARTERS_PER_COHORT: usize = 5;

#[derive(Deserialize)]
struct ManifestFile {
    cohorts: Vec<Vec<Quarter>>,
}

/// Cohort → quarter lookup, validated on construction.
///
/// Cohorts are numbered from 1. The flat list concatenates every cohort's
/// quarters, so cohort `n` begins at 1-based flat position `5(n-1)+1`.
#[derive(Debug, Clone)]
pub struct Manifest {
    cohorts: Vec<Vec<Quarter>>,
    flat: Vec<Quarter>,
}

impl Manifest {
    pub fn new(cohorts: Vec<Vec<Quarter>>) -> Result<Self> {
        for (i, quarters) in cohorts.iter().enumerate() {
            let number = i + 1;
            if quarters.len() != QUARTERS_PER_COHORT {
                bail!(
                    "cohort {} lists {} quarters, expected {}",
                    number,
                    quarters.len(),
                    QUARTERS_PER_COHORT
                );
            }
            for pair in quarters.windows(2) {
                if pair[0].next() != pair[1] {
                    bail!(
                        "cohort {}: {} is not followed by {}",
                        number,
                        pair[0],
                        pair[1]
                    );
                }
            }
        }
        let flat = cohorts.iter().flatten().copied().collect();
        Ok(Self { cohorts, flat })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: ManifestFile = serde_yaml::from_str(text).context("parsing quarter manifest")?;
        Self::new(file.cohorts)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    /// 1-based flat position of cohort `number`'s first quarter; `None` for 0.
    pub fn start_index(number: usize) -> Option<usize> {
        number
            .checked_sub(1)
            .map(|i| i * QUARTERS_PER_COHORT + 1)
    }

    pub fn cohort(&self, number: usize) -> Option<&[Quarter]> {
        number
            .checked_sub(1)
            .and_then(|i| self.cohorts.get(i))
            .map(Vec::as_slice)
    }

    /// `(number, start_index, quarters)` for every cohort, in order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &[Quarter])> + '_ {
        self.cohorts
            .iter()
            .enumerate()
            .map(|(i, q)| (i + 1, i * QUARTERS_PER_COHORT + 1, q.as_slice()))
    }

    /// The five quarters beginning at 1-based flat position `start`.
    pub fn quarters_for_start(&self, start: usize) -> Result<&[Quarter]> {
        let Some(first) = start.checked_sub(1) else {
            bail!("start index must be at least 1");
        };
        let end = first + QUARTERS_PER_COHORT;
        if end > self.flat.len() {
            bail!(
                "start index {} runs past the manifest ({} quarters)",
                start,
                self.flat.len()
            );
        }
        Ok(&self.flat[first..end])
    }
}
