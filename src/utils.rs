use std::error::Error;
use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

pub type DynError = Box<dyn Error + Send + Sync>;

/// Seconds between the Unix epoch (1970-01-01) and the GPS epoch (1980-01-06).
pub const GPS_UNIX_EPOCH_OFFSET: i64 = 315_964_800;
/// GPS-UTC leap second count, valid since 2017-01-01.
pub const GPS_UTC_LEAP_SECONDS: i64 = 18;

pub struct FftHelper {
    len: usize,
    pub forward_r2c: Arc<dyn RealToComplex<f64>>,
    pub inverse_c2r: Arc<dyn ComplexToReal<f64>>,
}

impl FftHelper {
    pub fn new(len: usize) -> Self {
        let mut planner_r2c = RealFftPlanner::new();

        let forward_r2c = planner_r2c.plan_fft_forward(len);
        let inverse_c2r = planner_r2c.plan_fft_inverse(len);

        Self {
            len,
            forward_r2c,
            inverse_c2r,
        }
    }

    pub fn half_spectrum_len(&self) -> usize {
        self.len / 2 + 1
    }

    pub fn forward_r2c_process(
        &self,
        input: &mut [f64],
        output: &mut [Complex<f64>],
    ) -> Result<(), DynError> {
        if input.len() != self.len {
            return Err("Input length for R2C does not match FFT configuration".into());
        }
        if output.len() != self.len / 2 + 1 {
            return Err(
                "Output length for R2C does not match expected half-spectrum length".into(),
            );
        }
        self.forward_r2c.process(input, output)?;
        Ok(())
    }

    pub fn inverse_c2r_process(
        &self,
        spectrum: &mut [Complex<f64>],
        output: &mut [f64],
    ) -> Result<(), DynError> {
        if spectrum.len() != self.len / 2 + 1 {
            return Err(
                "Input spectrum length for C2R does not match expected half-spectrum length".into(),
            );
        }
        if output.len() != self.len {
            return Err(
                "Output buffer length for C2R does not match expected time-domain length".into(),
            );
        }
        self.inverse_c2r.process(spectrum, output)?;
        let scale = 1.0 / self.len as f64;
        for value in output.iter_mut() {
            *value *= scale;
        }
        Ok(())
    }
}

/// 累積バッファに複素スペクトルのパワー `|z|^2` を加算する。
pub fn accumulate_power_add(dest: &mut [f64], src: &[Complex<f64>]) {
    debug_assert_eq!(dest.len(), src.len());
    for (acc, value) in dest.iter_mut().zip(src.iter()) {
        *acc += value.re * value.re + value.im * value.im;
    }
}

/// 累積バッファにクロススペクトル `a * conj(b)` を加算する。
pub fn accumulate_cross_add(dest: &mut [Complex<f64>], a: &[Complex<f64>], b: &[Complex<f64>]) {
    debug_assert_eq!(dest.len(), a.len());
    debug_assert_eq!(dest.len(), b.len());
    for ((acc, x), y) in dest.iter_mut().zip(a.iter()).zip(b.iter()) {
        *acc += x * y.conj();
    }
}

pub fn hanning_window(len: usize) -> Vec<f64> {
    let mut window = vec![0.0; len];
    for i in 0..len {
        window[i] = 0.5 * (1.0 - (2.0 * PI * i as f64 / (len as f64 - 1.0)).cos());
    }
    window
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Format a GPS timestamp as a UTC label for log output.
pub fn gps_to_utc_label(gps_seconds: f64) -> Result<String, DynError> {
    let unix_seconds = gps_seconds.floor() as i64 + GPS_UNIX_EPOCH_OFFSET - GPS_UTC_LEAP_SECONDS;
    let ts = unix_seconds as libc::time_t;
    let mut tm_out = std::mem::MaybeUninit::<libc::tm>::uninit();
    let ptr = unsafe { libc::gmtime_r(&ts, tm_out.as_mut_ptr()) };
    if ptr.is_null() {
        return Err("gmtime_r failed while formatting GPS time".into());
    }
    let tm = unsafe { tm_out.assume_init() };
    Ok(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    ))
}

pub fn available_cpu_cores() -> usize {
    let cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if cores < 1 {
        1
    } else {
        cores as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hanning_window_is_symmetric_with_zero_ends() {
        let window = hanning_window(65);
        assert!(window[0].abs() < 1e-12);
        assert!(window[64].abs() < 1e-12);
        assert!((window[32] - 1.0).abs() < 1e-12);
        for i in 0..65 {
            assert!((window[i] - window[64 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn fft_roundtrip_recovers_input() {
        let helper = FftHelper::new(64);
        let original: Vec<f64> = (0..64)
            .map(|i| (2.0 * PI * 5.0 * i as f64 / 64.0).sin() + 0.25)
            .collect();
        let mut input = original.clone();
        let mut spectrum = vec![Complex::new(0.0, 0.0); helper.half_spectrum_len()];
        helper
            .forward_r2c_process(&mut input, &mut spectrum)
            .unwrap();
        let mut output = vec![0.0; 64];
        helper
            .inverse_c2r_process(&mut spectrum, &mut output)
            .unwrap();
        for (a, b) in original.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn fft_helper_rejects_wrong_lengths() {
        let helper = FftHelper::new(32);
        let mut short_input = vec![0.0; 16];
        let mut spectrum = vec![Complex::new(0.0, 0.0); 17];
        assert!(helper
            .forward_r2c_process(&mut short_input, &mut spectrum)
            .is_err());
    }

    #[test]
    fn accumulators_match_manual_sums() {
        let a = vec![Complex::new(1.0, 2.0), Complex::new(-3.0, 0.5)];
        let b = vec![Complex::new(0.5, -1.0), Complex::new(2.0, 2.0)];

        let mut power = vec![0.0; 2];
        accumulate_power_add(&mut power, &a);
        assert!((power[0] - 5.0).abs() < 1e-12);
        assert!((power[1] - 9.25).abs() < 1e-12);

        let mut cross = vec![Complex::new(0.0, 0.0); 2];
        accumulate_cross_add(&mut cross, &a, &b);
        let expected0 = a[0] * b[0].conj();
        let expected1 = a[1] * b[1].conj();
        assert!((cross[0] - expected0).norm() < 1e-12);
        assert!((cross[1] - expected1).norm() < 1e-12);
    }

    #[test]
    fn round2_truncates_to_two_decimals() {
        assert_eq!(round2(0.8512), 0.85);
        assert_eq!(round2(0.856), 0.86);
        assert_eq!(round2(0.9), 0.9);
        assert_eq!(round2(1.0), 1.0);
    }

    #[test]
    fn gps_label_matches_known_conversion() {
        let label = gps_to_utc_label(1370000000.0).unwrap();
        assert_eq!(label, "2023-06-05 11:33:02 UTC");
    }
}
