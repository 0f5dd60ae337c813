use num_complex::Complex;

use crate::series::TimeSeries;
use crate::utils::{DynError, FftHelper};

/// Fourier resampling: transform, truncate or zero-pad the half spectrum to
/// the new length, transform back. The new sample count n * new / old must
/// come out as a positive integer or the rates are incompatible.
pub fn resample(series: &TimeSeries, new_rate: f64) -> Result<TimeSeries, DynError> {
    if !new_rate.is_finite() || new_rate <= 0.0 {
        return Err(format!(
            "Resampling target rate must be positive, received {new_rate} Hz"
        )
        .into());
    }
    if new_rate == series.sample_rate {
        return Ok(series.clone());
    }
    if series.is_empty() {
        return Err("Cannot resample an empty series".into());
    }
    let n = series.len();
    let exact_len = n as f64 * new_rate / series.sample_rate;
    let rounded = exact_len.round();
    if rounded < 1.0 || (exact_len - rounded).abs() > 1e-9 {
        return Err(format!(
            "Cannot resample {} Hz to {} Hz over {} samples \
             (target length {} is not an integer)",
            series.sample_rate, new_rate, n, exact_len
        )
        .into());
    }
    let m = rounded as usize;

    let forward = FftHelper::new(n);
    let inverse = FftHelper::new(m);

    let mut input = series.samples.clone();
    let mut spectrum = vec![Complex::new(0.0, 0.0); forward.half_spectrum_len()];
    forward.forward_r2c_process(&mut input, &mut spectrum)?;

    let mut target = vec![Complex::new(0.0, 0.0); inverse.half_spectrum_len()];
    let shorter = n.min(m);
    let keep = shorter / 2 + 1;
    target[..keep].copy_from_slice(&spectrum[..keep]);

    if shorter % 2 == 0 {
        let nyquist = shorter / 2;
        if m < n {
            // The new Nyquist bin gathers the old grid's +-Nyquist pair and
            // must be purely real for the C2R transform.
            target[nyquist] = Complex::new(2.0 * spectrum[nyquist].re, 0.0);
        } else {
            // The old Nyquist bin splits between the +-Nyquist positions of
            // the finer grid; the mirror half is implied by the C2R layout.
            target[nyquist] = spectrum[nyquist] * 0.5;
        }
    }
    target[0].im = 0.0;
    if m % 2 == 0 {
        let last = target.len() - 1;
        target[last].im = 0.0;
    }

    let mut output = vec![0.0; m];
    inverse.inverse_c2r_process(&mut target, &mut output)?;
    let scale = m as f64 / n as f64;
    for value in output.iter_mut() {
        *value *= scale;
    }

    Ok(TimeSeries {
        start: series.start,
        sample_rate: new_rate,
        samples: output,
    })
}
