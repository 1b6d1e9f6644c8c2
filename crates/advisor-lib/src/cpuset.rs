//! CPU set in Linux list format (`0-3,8,10-11`)

use crate::error::AdvisorError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Largest CPU id accepted when parsing, matching the kernel's `NR_CPUS` ceiling
pub const MAX_CPU_ID: u32 = 8191;

/// Ordered set of CPU ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    cpus: BTreeSet<u32>,
}

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of CPUs in the set
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn contains(&self, cpu: u32) -> bool {
        self.cpus.contains(&cpu)
    }

    pub fn insert(&mut self, cpu: u32) -> bool {
        self.cpus.insert(cpu)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.cpus.iter().copied()
    }

    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        self.cpus.intersection(&other.cpus).copied().collect()
    }

}

impl FromIterator<u32> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl FromStr for CpuSet {
    type Err = AdvisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| AdvisorError::InvalidCpuSet {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let parse_id = |raw: &str, what: &str| -> Result<u32, AdvisorError> {
            let cpu = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid(format!("bad {}", what).as_str()))?;
            if cpu > MAX_CPU_ID {
                return Err(invalid(
                    format!("{} {} exceeds {}", what, cpu, MAX_CPU_ID).as_str(),
                ));
            }
            Ok(cpu)
        };

        let mut cpus = BTreeSet::new();
        for part in s.trim().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some((start, end)) = part.split_once('-') {
                let start = parse_id(start, "range start")?;
                let end = parse_id(end, "range end")?;
                if end < start {
                    return Err(invalid("range end before start"));
                }
                cpus.extend(start..=end);
            } else {
                let cpu = parse_id(part, "cpu id")?;
                cpus.insert(cpu);
            }
        }

        Ok(Self { cpus })
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.cpus.iter().copied().peekable();
        let mut first = true;

        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }

            if !first {
                f.write_str(",")?;
            }
            first = false;

            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }

        Ok(())
    }
}

impl Serialize for CpuSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CpuSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
