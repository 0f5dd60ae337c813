use std::collections::HashMap;

use num_complex::Complex;
use rayon::prelude::*;

use crate::config::Config;
use crate::report::ResultRow;
use crate::resample::resample;
use crate::series::TimeSeries;
use crate::utils::{
    accumulate_cross_add, accumulate_power_add, hanning_window, round2, DynError, FftHelper,
};

/// Magnitude-squared coherence over the frequency grid `0..=Nyquist` with
/// bin spacing `df`.
pub struct CoherenceSpectrum {
    pub df: f64,
    pub values: Vec<f64>,
}

impl CoherenceSpectrum {
    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.values.len()).map(|i| i as f64 * self.df).collect()
    }

    /// Maximum over the inclusive band `[fl, fh]`. A band that selects no
    /// frequency bins is an error rather than a silent zero.
    pub fn band_max(&self, fl: f64, fh: f64) -> Result<f64, DynError> {
        let nyquist = (self.values.len() - 1) as f64 * self.df;
        // Tolerance keeps exact band edges inclusive despite float division.
        let lo = ((fl / self.df) - 1e-9).ceil().max(0.0) as usize;
        let hi_raw = ((fh / self.df) + 1e-9).floor();
        if hi_raw < 0.0 || lo >= self.values.len() {
            return Err(format!(
                "Band [{fl}, {fh}] Hz selects no frequency bins \
                 (bin spacing {} Hz, Nyquist {nyquist} Hz)",
                self.df
            )
            .into());
        }
        let hi = (hi_raw as usize).min(self.values.len() - 1);
        if lo > hi {
            return Err(format!(
                "Band [{fl}, {fh}] Hz selects no frequency bins \
                 (bin spacing {} Hz, Nyquist {nyquist} Hz)",
                self.df
            )
            .into());
        }
        Ok(self.values[lo..=hi].iter().cloned().fold(0.0, f64::max))
    }
}

fn detrend_and_window(src: &[f64], window: &[f64], dst: &mut [f64]) {
    let mean = src.iter().sum::<f64>() / src.len() as f64;
    for ((out, &x), &w) in dst.iter_mut().zip(src.iter()).zip(window.iter()) {
        *out = (x - mean) * w;
    }
}

/// Welch magnitude-squared coherence of two series at the same rate: Hann
/// window, per-segment mean removal, cross and auto spectra summed over
/// overlapping segments. Window and segment-count normalisations cancel in
/// the ratio, so the plain sums are used directly.
pub fn coherence_spectrum(
    a: &TimeSeries,
    b: &TimeSeries,
    fftlength: f64,
    overlap: f64,
) -> Result<CoherenceSpectrum, DynError> {
    if a.sample_rate != b.sample_rate {
        return Err(format!(
            "Coherence requires matching sample rates, received {} Hz and {} Hz",
            a.sample_rate, b.sample_rate
        )
        .into());
    }
    let rate = a.sample_rate;
    let nperseg = (fftlength * rate).round() as usize;
    if nperseg < 2 {
        return Err(format!(
            "FFT length {fftlength} s is shorter than two samples at {rate} Hz"
        )
        .into());
    }
    let noverlap = (overlap * rate).round() as usize;
    if noverlap >= nperseg {
        return Err(format!(
            "Overlap {overlap} s must be shorter than the FFT length {fftlength} s"
        )
        .into());
    }
    let hop = nperseg - noverlap;
    let n = a.len().min(b.len());
    if n < nperseg {
        return Err(format!(
            "Segment of {n} samples is shorter than one FFT length ({nperseg} samples)"
        )
        .into());
    }

    let helper = FftHelper::new(nperseg);
    let half_spec_len = helper.half_spectrum_len();
    let window = hanning_window(nperseg);

    // 蓄積バッファ: クロスは複素数、自己は実数パワー。
    let mut cross = vec![Complex::new(0.0, 0.0); half_spec_len];
    let mut auto_a = vec![0.0f64; half_spec_len];
    let mut auto_b = vec![0.0f64; half_spec_len];

    let mut frame_a = vec![0.0f64; nperseg];
    let mut frame_b = vec![0.0f64; nperseg];
    let mut spec_a = vec![Complex::new(0.0, 0.0); half_spec_len];
    let mut spec_b = vec![Complex::new(0.0, 0.0); half_spec_len];

    let mut offset = 0usize;
    while offset + nperseg <= n {
        detrend_and_window(&a.samples[offset..offset + nperseg], &window, &mut frame_a);
        detrend_and_window(&b.samples[offset..offset + nperseg], &window, &mut frame_b);
        helper.forward_r2c_process(&mut frame_a, &mut spec_a)?;
        helper.forward_r2c_process(&mut frame_b, &mut spec_b)?;
        accumulate_power_add(&mut auto_a, &spec_a);
        accumulate_power_add(&mut auto_b, &spec_b);
        accumulate_cross_add(&mut cross, &spec_a, &spec_b);
        offset += hop;
    }

    let values: Vec<f64> = cross
        .iter()
        .zip(auto_a.iter().zip(auto_b.iter()))
        .map(|(pxy, (pxx, pyy))| {
            let denom = pxx * pyy;
            // A silent bin carries no coherence; this also keeps NaN out of
            // the band maximum.
            if denom > 0.0 {
                pxy.norm_sqr() / denom
            } else {
                0.0
            }
        })
        .collect();

    Ok(CoherenceSpectrum {
        df: rate / nperseg as f64,
        values,
    })
}

/// One start time: coherence of the strain against every witness channel,
/// in channel-list order. The strain is resampled to the witness rate when
/// the rates differ, never the reverse. Returns a row (value rounded to two
/// decimals) plus the full spectrum for each channel whose band maximum
/// clears the threshold.
pub fn scan_channels(
    config: &Config,
    channels: &[String],
    strain: &TimeSeries,
    witnesses: &HashMap<String, TimeSeries>,
) -> Result<Vec<(ResultRow, CoherenceSpectrum)>, DynError> {
    let kept: Vec<Option<(ResultRow, CoherenceSpectrum)>> = channels
        .par_iter()
        .map(|channel| -> Result<Option<(ResultRow, CoherenceSpectrum)>, DynError> {
            let witness = witnesses
                .get(channel)
                .ok_or_else(|| format!("Witness channel {channel} was not loaded"))?;
            let spectrum = if strain.sample_rate != witness.sample_rate {
                let matched = resample(strain, witness.sample_rate)?;
                coherence_spectrum(&matched, witness, config.fftlength, config.overlap)?
            } else {
                coherence_spectrum(strain, witness, config.fftlength, config.overlap)?
            };
            let max = spectrum.band_max(config.fl, config.fh)?;
            if max >= config.threshold {
                let row = ResultRow {
                    channel: channel.clone(),
                    max_coherence: round2(max),
                };
                Ok(Some((row, spectrum)))
            } else {
                Ok(None)
            }
        })
        .collect::<Result<Vec<_>, DynError>>()?;
    Ok(kept.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use std::path::PathBuf;

    fn lcg_noise(seed: u64, len: usize, amplitude: f64) -> Vec<f64> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                amplitude * (2.0 * unit - 1.0)
            })
            .collect()
    }

    fn series(rate: f64, samples: Vec<f64>) -> TimeSeries {
        TimeSeries {
            start: 0.0,
            sample_rate: rate,
            samples,
        }
    }

    fn tone_plus_noise(rate: f64, len: usize, freq: f64, seed: u64) -> Vec<f64> {
        let noise = lcg_noise(seed, len, 0.05);
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / rate).sin() + noise[i])
            .collect()
    }

    #[test]
    fn identical_signals_are_fully_coherent() {
        let samples = tone_plus_noise(256.0, 4096, 40.0, 7);
        let a = series(256.0, samples.clone());
        let b = series(256.0, samples);
        let spectrum = coherence_spectrum(&a, &b, 2.0, 1.0).unwrap();
        for value in &spectrum.values {
            assert!(*value <= 1.0 + 1e-9);
            assert!(*value >= 1.0 - 1e-9 || *value == 0.0);
        }
    }

    #[test]
    fn shared_tone_is_coherent_and_independent_noise_is_not() {
        let rate = 256.0;
        let len = 16384;
        let a = series(rate, tone_plus_noise(rate, len, 40.0, 11));
        let b = series(rate, tone_plus_noise(rate, len, 40.0, 23));
        let spectrum = coherence_spectrum(&a, &b, 2.0, 1.0).unwrap();

        let at_tone = spectrum.band_max(39.0, 41.0).unwrap();
        assert!(at_tone > 0.9, "tone bin coherence {at_tone}");

        let off_tone = spectrum.band_max(80.0, 120.0).unwrap();
        assert!(off_tone < 0.8, "noise-only coherence {off_tone}");
    }

    #[test]
    fn mismatched_rates_are_rejected() {
        let a = series(256.0, vec![0.0; 512]);
        let b = series(128.0, vec![0.0; 512]);
        assert!(coherence_spectrum(&a, &b, 1.0, 0.5).is_err());
    }

    #[test]
    fn band_max_bounds_are_inclusive() {
        let spectrum = CoherenceSpectrum {
            df: 2.0,
            values: vec![0.1, 0.2, 0.9, 0.3, 0.8],
        };
        // [2, 6] covers bins 1..=3 and must not see the 0.8 at 8 Hz.
        let max = spectrum.band_max(2.0, 6.0).unwrap();
        assert_eq!(max, 0.9);
        // Single-frequency band.
        let single = spectrum.band_max(6.0, 6.0).unwrap();
        assert_eq!(single, 0.3);
    }

    #[test]
    fn empty_band_is_an_error() {
        let spectrum = CoherenceSpectrum {
            df: 2.0,
            values: vec![0.1, 0.2, 0.9, 0.3, 0.8],
        };
        assert!(spectrum.band_max(3.1, 3.9).is_err());
        assert!(spectrum.band_max(9.0, 20.0).is_err());
    }

    #[test]
    fn frequencies_run_from_zero_in_bin_steps() {
        let spectrum = CoherenceSpectrum {
            df: 0.5,
            values: vec![0.0; 5],
        };
        assert_eq!(spectrum.frequencies(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    fn scan_config() -> Config {
        Config {
            which_channels: "PEM".into(),
            start_times: vec![0.0],
            duration: 64.0,
            fl: 30.0,
            fh: 50.0,
            fftlength: 2.0,
            overlap: 1.0,
            strain_channel: "K1:STRAIN".into(),
            wit_channels: PathBuf::from("unused.txt"),
            threshold: 0.5,
            folder_path: PathBuf::from("unused"),
            output_path: PathBuf::from("unused"),
        }
    }

    #[test]
    fn scan_keeps_the_coherent_channel_and_drops_the_silent_one() {
        let config = scan_config();
        let witness_rate = 256.0;
        let witness_len = 16384;

        // The strain runs at twice the witness rate to exercise the
        // strain-to-witness resampling path.
        let strain = series(512.0, tone_plus_noise(512.0, 32768, 40.0, 3));
        let coherent = series(witness_rate, tone_plus_noise(witness_rate, witness_len, 40.0, 5));
        let unrelated = series(witness_rate, lcg_noise(17, witness_len, 1.0));

        let mut witnesses = HashMap::new();
        witnesses.insert("K1:PEM-A".to_string(), coherent);
        witnesses.insert("K1:PEM-B".to_string(), unrelated);
        let channels = vec!["K1:PEM-A".to_string(), "K1:PEM-B".to_string()];

        let kept = scan_channels(&config, &channels, &strain, &witnesses).unwrap();
        assert_eq!(kept.len(), 1);
        let (row, spectrum) = &kept[0];
        assert_eq!(row.channel, "K1:PEM-A");
        assert!(row.max_coherence >= config.threshold);
        assert!(row.max_coherence <= 1.0);
        let cents = row.max_coherence * 100.0;
        assert!((cents - cents.round()).abs() < 1e-9, "two decimals at most");

        // The coherence grid runs to the witness Nyquist, not the strain's.
        let top = (spectrum.values.len() - 1) as f64 * spectrum.df;
        assert!((top - witness_rate / 2.0).abs() < 1e-9);
    }
}
