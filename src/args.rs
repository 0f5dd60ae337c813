use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Scan witness channels for coherence with the strain channel",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  max_coherence --config scan.conf\n  max_coherence --config scan.conf --start 1368975618 --duration 128 --plot\n  max_coherence --config scan.conf --fl 10 --fh 100 --threshold 0.6 --cpu 8\n"
)]
pub struct Args {
    /// Configuration file with the analysis parameters
    #[arg(long)]
    pub config: PathBuf,

    /// Comma-separated GPS start times (overrides the configuration)
    #[arg(long)]
    pub start: Option<String>,

    /// Segment duration in seconds (overrides the configuration)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Lower edge of the frequency band in Hz (overrides the configuration)
    #[arg(long)]
    pub fl: Option<f64>,

    /// Upper edge of the frequency band in Hz (overrides the configuration)
    #[arg(long)]
    pub fh: Option<f64>,

    /// FFT length in seconds for the coherence estimate (overrides the configuration)
    #[arg(long, visible_alias = "fft")]
    pub fftlength: Option<f64>,

    /// Segment overlap in seconds (overrides the configuration)
    #[arg(long)]
    pub overlap: Option<f64>,

    /// Reporting threshold on the band maximum (overrides the configuration)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Strain channel name (overrides the configuration)
    #[arg(long)]
    pub strain: Option<String>,

    /// File listing witness channel names, one per line (overrides the configuration)
    #[arg(long)]
    pub channels: Option<PathBuf>,

    /// Directory containing the frame files (overrides the configuration)
    #[arg(long, visible_alias = "frames")]
    pub data: Option<PathBuf>,

    /// Directory for the report and figures (overrides the configuration)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Write a coherence figure for every channel that clears the threshold
    #[arg(long)]
    pub plot: bool,

    /// Number of parallel worker threads
    #[arg(long, default_value_t = 1)]
    pub cpu: usize,
}
