use std::path::{Path, PathBuf};

use plotters::prelude::PathElement;
use plotters::prelude::*;

use crate::coherence::CoherenceSpectrum;
use crate::utils::DynError;

const PLOT_FONT_SCALE: f64 = 1.2;

fn scaled_font_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

fn scaled_area_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

/// Channel names carry ':' which does not belong in a file name.
pub fn plot_file_name(output_dir: &Path, channel: &str, start_time: f64) -> PathBuf {
    let safe = channel.replace([':', '/'], "_");
    output_dir.join(format!("coherence_{safe}_{start_time}.png"))
}

/// Coherence against frequency for one channel, with the threshold drawn as
/// a horizontal line.
pub fn plot_coherence(
    spectrum: &CoherenceSpectrum,
    channel: &str,
    threshold: f64,
    filename: &Path,
) -> Result<(), DynError> {
    if spectrum.values.is_empty() {
        return Err("No data points to plot".into());
    }

    let root = BitMapBackend::new(filename, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let nyquist = (spectrum.values.len() - 1) as f64 * spectrum.df;

    let mut chart = ChartBuilder::on(&root)
        .caption(channel, ("sans-serif", scaled_font_size(32)).into_font())
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(0.0..nyquist, 0.0..1.05)?;

    chart
        .configure_mesh()
        .x_desc("Frequency [Hz]")
        .y_desc("Coherence")
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .light_line_style(WHITE.mix(0.0))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            spectrum
                .frequencies()
                .into_iter()
                .zip(spectrum.values.iter().copied()),
            &BLUE,
        ))?
        .label(channel)
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            [(0.0, threshold), (nyquist, threshold)],
            &RED,
        ))?
        .label("threshold")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], RED));

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", scaled_font_size(20)).into_font())
        .draw()?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plot_file_name_replaces_separators() {
        let path = plot_file_name(Path::new("results"), "K1:PEM-MIC_BS_BOOTH", 1368975618.0);
        assert_eq!(
            path,
            Path::new("results").join("coherence_K1_PEM-MIC_BS_BOOTH_1368975618.png")
        );
    }
}
