use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::{
    grid::powers_of_ten,
    record::{RecordError, parse_field, split_fields},
};

/// One parsed results line as the visualizer sees it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    /// The recorded workload magnitude. Not used as the x value, only checked.
    pub recorded_workload: Option<u64>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("{cluster_size} nodes: series has {found} points, x axis has {expected}")]
    LengthMismatch {
        cluster_size: u32,
        found: usize,
        expected: usize,
    },
    #[error("{cluster_size} nodes: elapsed time {value} cannot be drawn on a log axis")]
    NonPositive { cluster_size: u32, value: f64 },
    #[error("no results to plot")]
    Empty,
}

/// The fixed x axis, `10^0 .. 10^(exponents-1)`. It is not derived from the records.
pub fn x_axis(exponents: u32) -> Vec<f64> {
    powers_of_ten(exponents).map(|x| x as f64).collect()
}

/// Elapsed times grouped by cluster size, each group in input order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregatedSeries {
    groups: BTreeMap<u32, Vec<SeriesPoint>>,
}

impl AggregatedSeries {
    /// Parses `cluster_size <workload> elapsed_time` lines. Blank lines are skipped.
    pub fn parse(data: &str) -> Result<Self, RecordError> {
        let mut series = Self::default();
        for (idx, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = split_fields(line).and_then(|[cluster_size, workload, elapsed]| {
                Ok((
                    parse_field::<u32>("cluster size", cluster_size)?,
                    SeriesPoint {
                        recorded_workload: workload.parse().ok(),
                        elapsed_secs: parse_field("elapsed time", elapsed)?,
                    },
                ))
            });
            let (cluster_size, point) = parsed.map_err(|err| err.at_line(idx + 1))?;
            series.push(cluster_size, point);
        }
        Ok(series)
    }

    pub fn push(&mut self, cluster_size: u32, point: SeriesPoint) {
        self.groups.entry(cluster_size).or_default().push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn cluster_sizes(&self) -> impl Iterator<Item = u32> + '_ {
        self.groups.keys().copied()
    }

    /// Elapsed times per cluster size, ascending by cluster size
    pub fn iter(&self) -> impl Iterator<Item = (u32, Vec<f64>)> + '_ {
        self.groups.iter().map(|(cluster_size, points)| {
            (
                *cluster_size,
                points.iter().map(|p| p.elapsed_secs).collect(),
            )
        })
    }

    /// Every series must line up element-wise with `x_axis`.
    pub fn check_lengths(&self, x_axis: &[f64]) -> Result<(), SeriesError> {
        if self.is_empty() {
            return Err(SeriesError::Empty);
        }
        for (cluster_size, points) in &self.groups {
            if points.len() != x_axis.len() {
                return Err(SeriesError::LengthMismatch {
                    cluster_size: *cluster_size,
                    found: points.len(),
                    expected: x_axis.len(),
                });
            }
        }
        Ok(())
    }

    /// Fails on values a log scale cannot show
    pub fn check_positive(&self) -> Result<(), SeriesError> {
        for (cluster_size, points) in &self.groups {
            if let Some(point) = points.iter().find(|p| p.elapsed_secs <= 0.0) {
                return Err(SeriesError::NonPositive {
                    cluster_size: *cluster_size,
                    value: point.elapsed_secs,
                });
            }
        }
        Ok(())
    }

    /// Warns about points whose recorded workload disagrees with the positional x value.
    /// Returns how many disagreed.
    pub fn warn_on_workload_drift(&self, x_axis: &[f64]) -> usize {
        let mut drift = 0;
        for (cluster_size, points) in &self.groups {
            for (point, x) in points.iter().zip(x_axis) {
                if let Some(recorded) = point.recorded_workload
                    && recorded as f64 != *x
                {
                    warn!(
                        "{cluster_size} nodes: recorded workload {recorded} plotted at x={x}, results are out of sweep order"
                    );
                    drift += 1;
                }
            }
        }
        drift
    }

    /// Elapsed time divided by the x value, per cluster size
    pub fn per_task_times(&self, x_axis: &[f64]) -> Result<Vec<(u32, Vec<f64>)>, SeriesError> {
        self.check_lengths(x_axis)?;
        Ok(self
            .iter()
            .map(|(cluster_size, times)| {
                let per_task = times.iter().zip(x_axis).map(|(t, x)| t / x).collect();
                (cluster_size, per_task)
            })
            .collect())
    }

    /// Smallest and largest elapsed time across all series
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.groups
            .values()
            .flatten()
            .map(|p| p.elapsed_secs)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seven_lines(cluster_size: u32) -> String {
        powers_of_ten(7)
            .enumerate()
            .map(|(i, w)| format!("{cluster_size} {w} 0.{}12\n", i + 1))
            .collect()
    }

    #[test]
    fn x_axis_is_fixed_powers_of_ten() {
        assert_eq!(
            x_axis(7),
            vec![1.0, 10.0, 100.0, 1e3, 1e4, 1e5, 1e6]
        );
    }

    #[test]
    fn grouping_is_stable_and_order_preserving() {
        let series = AggregatedSeries::parse("3 1 0.3\n2 1 0.2\n3 10 0.1\n\n2 10 0.4\n3 100 0.5\n")
            .unwrap();
        assert_eq!(series.cluster_sizes().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(
            series.iter().collect::<Vec<_>>(),
            vec![(2, vec![0.2, 0.4]), (3, vec![0.3, 0.1, 0.5])]
        );
        assert_eq!(series.bounds(), Some((0.1, 0.5)));
    }

    #[test]
    fn seven_point_series_matches_the_axis() {
        let series = AggregatedSeries::parse(&seven_lines(3)).unwrap();
        let x = x_axis(7);
        assert_eq!(series.check_lengths(&x), Ok(()));
        assert_eq!(series.warn_on_workload_drift(&x), 0);

        let per_task = series.per_task_times(&x).unwrap();
        assert_eq!(per_task.len(), 1);
        assert_eq!(per_task[0].0, 3);
        assert_eq!(per_task[0].1[0], 0.112);
        assert_eq!(per_task[0].1[1], 0.212 / 10.0);
    }

    #[test]
    fn short_series_is_a_length_mismatch() {
        let mut data = seven_lines(3);
        data.push_str("4 1 0.1\n4 10 0.2\n4 100 0.3\n4 1000 0.4\n4 10000 0.5\n");
        let series = AggregatedSeries::parse(&data).unwrap();

        let expected = SeriesError::LengthMismatch {
            cluster_size: 4,
            found: 5,
            expected: 7,
        };
        assert_eq!(series.check_lengths(&x_axis(7)), Err(expected));
        assert!(series.per_task_times(&x_axis(7)).is_err());
    }

    #[test]
    fn empty_input_cannot_be_plotted() {
        let series = AggregatedSeries::parse("\n\n").unwrap();
        assert_eq!(series.check_lengths(&x_axis(7)), Err(SeriesError::Empty));
        assert_eq!(series.bounds(), None);
    }

    #[test]
    fn middle_field_is_only_checked() {
        let series = AggregatedSeries::parse("2 ten 0.5\n2 100 0.6\n").unwrap();
        assert_eq!(series.iter().next(), Some((2, vec![0.5, 0.6])));
        assert_eq!(series.warn_on_workload_drift(&x_axis(2)), 1);
    }

    #[test]
    fn malformed_lines_name_the_line() {
        assert_eq!(
            AggregatedSeries::parse("2 1 0.5\n2 10\n"),
            Err(RecordError::FieldCount { line: 2, found: 2 })
        );
        assert!(matches!(
            AggregatedSeries::parse("two 1 0.5\n"),
            Err(RecordError::InvalidField {
                line: 1,
                field: "cluster size",
                ..
            })
        ));
    }

    #[test]
    fn non_positive_times_are_rejected() {
        let series = AggregatedSeries::parse("2 1 0\n").unwrap();
        assert!(matches!(
            series.check_positive(),
            Err(SeriesError::NonPositive { cluster_size: 2, .. })
        ));
    }
}
