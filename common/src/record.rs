use std::{fmt, path::Path, str::FromStr};

use eyre::{Context, Result};
use thiserror::Error;
use tokio::{
    fs::{OpenOptions, read_to_string},
    io::AsyncWriteExt,
};

use crate::grid::TrialParams;

/// Timing harvested from one successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub cluster_size: u32,
    pub workload_magnitude: u64,
    /// The leader's trimmed stdout, kept verbatim. Only the plotter parses it.
    pub elapsed: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("line {line}: expected 3 whitespace separated fields, found {found}")]
    FieldCount { line: usize, found: usize },
    #[error("line {line}: invalid {field} {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

impl RecordError {
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            RecordError::FieldCount { found, .. } => RecordError::FieldCount { line, found },
            RecordError::InvalidField { field, value, .. } => {
                RecordError::InvalidField { line, field, value }
            }
        }
    }
}

impl ResultRecord {
    pub fn new(params: TrialParams, elapsed: impl Into<String>) -> Self {
        Self {
            cluster_size: params.cluster_size,
            workload_magnitude: params.workload_magnitude,
            elapsed: elapsed.into(),
        }
    }

    pub fn params(&self) -> TrialParams {
        TrialParams::new(self.cluster_size, self.workload_magnitude)
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.cluster_size, self.workload_magnitude, self.elapsed
        )
    }
}

pub(crate) fn split_fields(line: &str) -> Result<[&str; 3], RecordError> {
    let fields = line.split_whitespace().collect::<Vec<_>>();
    <[&str; 3]>::try_from(fields.as_slice()).map_err(|_| RecordError::FieldCount {
        line: 0,
        found: fields.len(),
    })
}

pub(crate) fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, RecordError> {
    value.parse().map_err(|_| RecordError::InvalidField {
        line: 0,
        field,
        value: value.to_owned(),
    })
}

fn split_first_field(text: &str) -> Option<(&str, &str)> {
    text.split_once(char::is_whitespace)
        .map(|(head, rest)| (head, rest.trim_start()))
}

impl FromStr for ResultRecord {
    type Err = RecordError;

    /// The third field is the rest of the line, whatever the leader printed.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let field_count = || RecordError::FieldCount {
            line: 0,
            found: line.split_whitespace().count(),
        };
        let (cluster_size, rest) = split_first_field(line).ok_or_else(field_count)?;
        let (workload_magnitude, elapsed) = split_first_field(rest).ok_or_else(field_count)?;
        if elapsed.is_empty() {
            return Err(field_count());
        }
        Ok(Self {
            cluster_size: parse_field("cluster size", cluster_size)?,
            workload_magnitude: parse_field("workload magnitude", workload_magnitude)?,
            elapsed: elapsed.to_owned(),
        })
    }
}

/// Appends one record line, creating the file if needed.
pub async fn append_record(path: &Path, record: &ResultRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Opening results file {}", path.display()))?;
    file.write_all(format!("{record}\n").as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

pub async fn read_records(path: &Path) -> Result<Vec<ResultRecord>> {
    let data = read_to_string(path)
        .await
        .with_context(|| format!("Reading results file {}", path.display()))?;
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            line.parse::<ResultRecord>()
                .map_err(|err| eyre::Report::new(err.at_line(idx + 1)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn formats_as_space_separated_triple() {
        let record = ResultRecord::new(TrialParams::new(2, 1), "0.004231");
        assert_eq!(record.to_string(), "2 1 0.004231");
    }

    #[test]
    fn parses_lines() {
        let record = "3 100  0.031\n".parse::<ResultRecord>().unwrap();
        assert_eq!(record.params(), TrialParams::new(3, 100));
        assert_eq!(record.elapsed, "0.031");

        assert_eq!(
            "3 100".parse::<ResultRecord>(),
            Err(RecordError::FieldCount { line: 0, found: 2 })
        );
        assert!(matches!(
            "three 100 1.5".parse::<ResultRecord>(),
            Err(RecordError::InvalidField {
                field: "cluster size",
                ..
            })
        ));
    }

    #[test]
    fn leader_text_is_kept_verbatim() {
        let record = ResultRecord::new(TrialParams::new(2, 1), "1.0e-3");
        assert_eq!(record.to_string(), "2 1 1.0e-3");

        let record = "2 10 0.3 s".parse::<ResultRecord>().unwrap();
        assert_eq!(record.elapsed, "0.3 s");
        assert_eq!(record.to_string(), "2 10 0.3 s");
    }

    #[tokio::test]
    async fn append_then_read_back_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        let records = [
            ResultRecord::new(TrialParams::new(2, 1), "0.5"),
            ResultRecord::new(TrialParams::new(2, 10), "0.75"),
            ResultRecord::new(TrialParams::new(3, 1), "1.25"),
        ];
        for record in &records {
            append_record(&path, record).await.unwrap();
        }

        assert_eq!(
            read_to_string(&path).await.unwrap(),
            "2 1 0.5\n2 10 0.75\n3 1 1.25\n"
        );
        assert_eq!(read_records(&path).await.unwrap(), records);
    }

    #[tokio::test]
    async fn read_reports_line_numbers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        tokio::fs::write(&path, "2 1 0.5\n\n2 10\n").await.unwrap();

        let err = read_records(&path).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RecordError>(),
            Some(&RecordError::FieldCount { line: 3, found: 2 })
        );
    }
}
