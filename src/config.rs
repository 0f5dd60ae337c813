use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::args::Args;
use crate::utils::DynError;

/// Fully resolved analysis configuration. Loaded once, immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub which_channels: String,
    pub start_times: Vec<f64>,
    pub duration: f64,
    pub fl: f64,
    pub fh: f64,
    pub fftlength: f64,
    pub overlap: f64,
    pub strain_channel: String,
    pub wit_channels: PathBuf,
    pub threshold: f64,
    pub folder_path: PathBuf,
    pub output_path: PathBuf,
}

fn require_string(
    params: &HashMap<String, String>,
    keys: &[&str],
    label: &str,
) -> Result<String, DynError> {
    for key in keys {
        if let Some(value) = params.get(*key) {
            if !value.is_empty() {
                return Ok(value.clone());
            }
        }
    }
    Err(format!("Configuration is missing required field '{label}'").into())
}

fn require_f64(
    params: &HashMap<String, String>,
    keys: &[&str],
    label: &str,
) -> Result<f64, DynError> {
    for key in keys {
        if let Some(value) = params.get(*key) {
            match value.trim().parse::<f64>() {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    return Err(format!("Invalid value for '{label}': {e}").into());
                }
            }
        }
    }
    Err(format!("Configuration is missing required field '{label}'").into())
}

pub fn parse_f64_list(raw: &str) -> Result<Vec<f64>, DynError> {
    let values: Vec<f64> = raw
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, DynError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read configuration {}: {e}", path.display()))?;
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> Result<Self, DynError> {
        let mut params = HashMap::new();
        for line in text.lines() {
            let line = line.splitn(2, '#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(index) = line.find('=') {
                let (key, value) = line.split_at(index);
                let key = key.trim().to_ascii_lowercase().replace('_', "");
                let value = value
                    .trim_start_matches('=')
                    .trim()
                    .trim_matches('"')
                    .trim_matches('\'')
                    .to_string();
                params.insert(key, value);
            }
        }

        let start_times_raw = require_string(&params, &["starttimes", "starts"], "start_times")?;
        let start_times = parse_f64_list(&start_times_raw)
            .map_err(|e| format!("Invalid value for 'start_times': {e}"))?;

        Ok(Config {
            which_channels: require_string(
                &params,
                &["whichchannels", "channelgroup"],
                "which_channels",
            )?,
            start_times,
            duration: require_f64(&params, &["duration"], "duration")?,
            fl: require_f64(&params, &["fl", "freqlow"], "fl")?,
            fh: require_f64(&params, &["fh", "freqhigh"], "fh")?,
            fftlength: require_f64(&params, &["fftlength", "fft"], "fftlength")?,
            overlap: require_f64(&params, &["overlap"], "overlap")?,
            strain_channel: require_string(
                &params,
                &["strainchannel", "strain"],
                "strain_channel",
            )?,
            wit_channels: PathBuf::from(require_string(
                &params,
                &["witchannels", "channellist"],
                "wit_channels",
            )?),
            threshold: require_f64(&params, &["threshold"], "threshold")?,
            folder_path: PathBuf::from(require_string(
                &params,
                &["folderpath", "framedir"],
                "folder_path",
            )?),
            output_path: PathBuf::from(require_string(
                &params,
                &["outputfigpath", "outputdir", "output"],
                "output_fig_path",
            )?),
        })
    }

    /// Command-line values win over the configuration file.
    pub fn apply_overrides(&mut self, args: &Args) -> Result<(), DynError> {
        if let Some(raw) = &args.start {
            self.start_times = parse_f64_list(raw)
                .map_err(|e| format!("Invalid value for '--start': {e}"))?;
        }
        if let Some(duration) = args.duration {
            self.duration = duration;
        }
        if let Some(fl) = args.fl {
            self.fl = fl;
        }
        if let Some(fh) = args.fh {
            self.fh = fh;
        }
        if let Some(fftlength) = args.fftlength {
            self.fftlength = fftlength;
        }
        if let Some(overlap) = args.overlap {
            self.overlap = overlap;
        }
        if let Some(threshold) = args.threshold {
            self.threshold = threshold;
        }
        if let Some(strain) = &args.strain {
            self.strain_channel = strain.clone();
        }
        if let Some(channels) = &args.channels {
            self.wit_channels = channels.clone();
        }
        if let Some(data) = &args.data {
            self.folder_path = data.clone();
        }
        if let Some(output) = &args.output {
            self.output_path = output.clone();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DynError> {
        if self.start_times.is_empty() {
            return Err("At least one start time is required".into());
        }
        if self.start_times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err("Start times must be non-negative GPS seconds".into());
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(format!("Duration must be positive, received {} s", self.duration).into());
        }
        if !self.fftlength.is_finite() || self.fftlength <= 0.0 {
            return Err(
                format!("FFT length must be positive, received {} s", self.fftlength).into(),
            );
        }
        if !self.overlap.is_finite() || self.overlap < 0.0 || self.overlap >= self.fftlength {
            return Err(format!(
                "Overlap ({} s) must be non-negative and shorter than the FFT length ({} s)",
                self.overlap, self.fftlength
            )
            .into());
        }
        if self.fftlength > self.duration {
            return Err(format!(
                "FFT length ({} s) does not fit in the segment duration ({} s)",
                self.fftlength, self.duration
            )
            .into());
        }
        if !self.fl.is_finite() || self.fl < 0.0 {
            return Err(format!("fl must be non-negative, received {} Hz", self.fl).into());
        }
        if !self.fh.is_finite() || self.fh < self.fl {
            return Err(format!(
                "Frequency band is inverted: fl = {} Hz, fh = {} Hz",
                self.fl, self.fh
            )
            .into());
        }
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "Coherence threshold must lie in [0, 1], received {}",
                self.threshold
            )
            .into());
        }
        Ok(())
    }
}

/// One witness channel name per line. Order is kept and duplicates are not
/// removed; a duplicated name yields a duplicated report row.
pub fn load_channel_list(path: &Path) -> Result<Vec<String>, DynError> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open channel list {}: {e}", path.display()))?;
    let reader = BufReader::new(file);
    let mut channels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        channels.push(name.to_string());
    }
    Ok(channels)
}
