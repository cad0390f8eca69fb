use std::path::Path;

use common::plot::AggregatedSeries;
use eyre::{Result, eyre};
use plotters::prelude::*;
use tracing::debug;

/// Log-log chart of total execution time against number of tasks, one line per cluster size.
#[derive(Debug, Clone)]
pub struct ScalingPlot {
    pub width: u32,
    pub height: u32,
    pub caption: String,
}

impl Default for ScalingPlot {
    fn default() -> Self {
        Self {
            width: 1400,
            height: 900,
            caption: "Execution time by cluster size".to_owned(),
        }
    }
}

/// Pads a range so that a single value still spans a visible decade on a log axis
pub fn log_range(lo: f64, hi: f64) -> (f64, f64) {
    if lo == hi {
        (lo / 10.0, hi * 10.0)
    } else {
        (lo / 1.5, hi * 1.5)
    }
}

impl ScalingPlot {
    /// Renders `series` against `x_axis` into `path`. Every series must have exactly
    /// one point per x value.
    pub fn render(&self, series: &AggregatedSeries, x_axis: &[f64], path: &Path) -> Result<()> {
        series.check_lengths(x_axis)?;
        series.check_positive()?;

        let (y_lo, y_hi) = series.bounds().ok_or_else(|| eyre!("No results to plot"))?;
        let (y_lo, y_hi) = log_range(y_lo, y_hi);
        let x_lo = x_axis.iter().copied().fold(f64::INFINITY, f64::min);
        let x_hi = x_axis.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (x_lo, x_hi) = log_range(x_lo, x_hi);
        debug!(
            "Plotting {} series, x=[{x_lo}, {x_hi}] y=[{y_lo}, {y_hi}]",
            series.cluster_sizes().count()
        );

        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&self.caption, ("sans-serif", 40))
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(80)
            .build_cartesian_2d((x_lo..x_hi).log_scale(), (y_lo..y_hi).log_scale())?;

        chart
            .configure_mesh()
            .x_desc("Number of tasks")
            .y_desc("Total execution time (s)")
            .x_label_formatter(&|x| format!("{x:.0e}"))
            .y_label_formatter(&|y| format!("{y:.0e}"))
            .draw()?;

        for (idx, (cluster_size, times)) in series.iter().enumerate() {
            let color = Palette99::pick(idx).to_rgba();
            let points = x_axis.iter().copied().zip(times).collect::<Vec<_>>();

            chart
                .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))?
                .label(format!("{cluster_size} Nodes"))
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                });
            chart.draw_series(
                points
                    .into_iter()
                    .map(|point| Circle::new(point, 3, color.filled())),
            )?;
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::plot::{SeriesError, x_axis};

    use super::*;

    #[test]
    fn single_value_range_is_widened() {
        assert_eq!(log_range(1.0, 1.0), (0.1, 10.0));
        let (lo, hi) = log_range(1.0, 1e6);
        assert!(lo < 1.0 && hi > 1e6);
    }

    #[test]
    fn seven_point_series_is_rendered() {
        let data = [1.2, 1.3, 1.9, 4.0, 21.0, 180.0, 1700.0]
            .iter()
            .zip(x_axis(7))
            .map(|(t, w)| format!("3 {w} {t}\n"))
            .collect::<String>();
        let series = AggregatedSeries::parse(&data).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scaling.png");

        ScalingPlot::default()
            .render(&series, &x_axis(7), &path)
            .unwrap();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn mismatched_series_fails_before_drawing() {
        let series = AggregatedSeries::parse("2 1 0.1\n2 10 0.2\n2 100 0.3\n2 1000 0.4\n2 10000 0.5\n")
            .unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scaling.png");
        let err = ScalingPlot::default()
            .render(&series, &x_axis(7), &path)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SeriesError>(),
            Some(&SeriesError::LengthMismatch {
                cluster_size: 2,
                found: 5,
                expected: 7
            })
        );
        assert!(!path.exists());
    }
}
