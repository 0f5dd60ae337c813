use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::frame::{self, FRAME_SPAN_SECONDS};
use crate::series::TimeSeries;
use crate::utils::DynError;

/// 32-second-aligned frame timestamps covering `[start, start + duration)`.
/// Both bounds are rounded down to the nearest frame boundary; the frame
/// containing `end` is read even when `end` falls exactly on its boundary,
/// and the surplus is cropped away afterwards.
pub fn frame_starts(start_time: f64, duration: f64) -> Vec<i64> {
    let end_time = start_time + duration;
    let span = FRAME_SPAN_SECONDS as f64;
    let first = (start_time - start_time.rem_euclid(span)) as i64;
    let last = (end_time - end_time.rem_euclid(span)) as i64;
    (first..=last)
        .step_by(FRAME_SPAN_SECONDS as usize)
        .collect()
}

fn crop_to_span(
    name: &str,
    sample_rate: f64,
    samples: Vec<f64>,
    data_start: f64,
    start_time: f64,
    duration: f64,
) -> Result<TimeSeries, DynError> {
    let first_index = ((start_time - data_start) * sample_rate).round() as usize;
    let wanted_len = (duration * sample_rate).round() as usize;
    if wanted_len == 0 {
        return Err(format!(
            "Requested span is shorter than one sample of {name} at {sample_rate} Hz"
        )
        .into());
    }
    if first_index + wanted_len > samples.len() {
        return Err(format!(
            "Channel {name} holds {} samples, requested span needs {}",
            samples.len(),
            first_index + wanted_len
        )
        .into());
    }
    let cropped = samples[first_index..first_index + wanted_len].to_vec();
    Ok(TimeSeries {
        start: start_time,
        sample_rate,
        samples: cropped,
    })
}

/// Loads the strain channel and every witness channel for
/// `[start_time, start_time + duration)`: enumerates the covering frame
/// files, requires every channel in every frame at a consistent rate,
/// stitches them and crops to the requested span. Any missing file or
/// channel aborts the whole read.
pub fn read_data(
    config: &Config,
    channels: &[String],
    start_time: f64,
) -> Result<(TimeSeries, HashMap<String, TimeSeries>), DynError> {
    let mut wanted: HashSet<&str> = channels.iter().map(|s| s.as_str()).collect();
    wanted.insert(config.strain_channel.as_str());

    let starts = frame_starts(start_time, config.duration);
    let data_start = starts[0] as f64;

    let mut stitched: HashMap<String, (f64, Vec<f64>)> = HashMap::new();
    for &frame_start in &starts {
        let path = frame::frame_path(&config.folder_path, frame_start);
        let mut frame = frame::read_frame(&path, &wanted)?;
        if frame.frame_start != frame_start {
            return Err(format!(
                "Frame {} reports start {} instead of {frame_start}",
                path.display(),
                frame.frame_start
            )
            .into());
        }
        if i64::from(frame.span_seconds) != FRAME_SPAN_SECONDS {
            return Err(format!(
                "Frame {} spans {} s instead of {FRAME_SPAN_SECONDS} s",
                path.display(),
                frame.span_seconds
            )
            .into());
        }
        for name in &wanted {
            let channel = frame
                .channels
                .remove(*name)
                .ok_or_else(|| format!("Channel {name} is missing from {}", path.display()))?;
            match stitched.entry((*name).to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert((channel.sample_rate, channel.samples));
                }
                Entry::Occupied(mut slot) => {
                    let (rate, samples) = slot.get_mut();
                    if *rate != channel.sample_rate {
                        return Err(format!(
                            "Channel {name} changes sample rate across frames \
                             ({} Hz vs {} Hz)",
                            rate, channel.sample_rate
                        )
                        .into());
                    }
                    samples.extend_from_slice(&channel.samples);
                }
            }
        }
    }

    let mut loaded: HashMap<String, TimeSeries> = HashMap::new();
    for (name, (rate, samples)) in stitched {
        let series = crop_to_span(&name, rate, samples, data_start, start_time, config.duration)?;
        loaded.insert(name, series);
    }

    let strain = loaded
        .get(&config.strain_channel)
        .cloned()
        .ok_or_else(|| format!("Strain channel {} was not loaded", config.strain_channel))?;
    Ok((strain, loaded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameWriter;
    use std::path::{Path, PathBuf};

    #[test]
    fn frame_starts_round_both_bounds_down_to_32() {
        assert_eq!(frame_starts(100.0, 50.0), vec![96, 128]);
        assert_eq!(frame_starts(96.0, 32.0), vec![96, 128]);
        assert_eq!(frame_starts(100.5, 10.0), vec![96]);
        assert_eq!(frame_starts(0.0, 1.0), vec![0]);
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("max_coherence_read_{}_{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_config(folder: PathBuf) -> Config {
        Config {
            which_channels: "TEST".into(),
            start_times: vec![100.0],
            duration: 50.0,
            fl: 1.0,
            fh: 4.0,
            fftlength: 4.0,
            overlap: 2.0,
            strain_channel: "K1:STRAIN".into(),
            wit_channels: PathBuf::from("unused.txt"),
            threshold: 0.5,
            folder_path: folder,
            output_path: PathBuf::from("unused"),
        }
    }

    fn write_ramp_frames(dir: &Path) {
        for (frame_index, frame_start) in [96i64, 128].into_iter().enumerate() {
            let path = frame::frame_path(dir, frame_start);
            let mut writer = FrameWriter::create(&path, frame_start).unwrap();
            let strain: Vec<f64> = (0..512).map(|i| (frame_index * 512 + i) as f64).collect();
            writer.write_channel("K1:STRAIN", 16.0, &strain).unwrap();
            let witness: Vec<f64> = (0..256).map(|i| (frame_index * 256 + i) as f64).collect();
            writer.write_channel("K1:PEM-W1", 8.0, &witness).unwrap();
            writer.finalize().unwrap();
        }
    }

    #[test]
    fn read_data_stitches_and_crops_to_requested_span() {
        let dir = temp_dir("stitch");
        write_ramp_frames(&dir);
        let config = test_config(dir.clone());

        let channels = vec!["K1:PEM-W1".to_string()];
        let (strain, witnesses) = read_data(&config, &channels, 100.0).unwrap();

        assert_eq!(strain.sample_rate, 16.0);
        assert_eq!(strain.start, 100.0);
        assert_eq!(strain.len(), 800);
        assert_eq!(strain.samples[0], 64.0);
        assert_eq!(strain.samples[799], 863.0);

        let witness = &witnesses["K1:PEM-W1"];
        assert_eq!(witness.sample_rate, 8.0);
        assert_eq!(witness.len(), 400);
        assert_eq!(witness.samples[0], 32.0);
        assert_eq!(witness.samples[399], 431.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_channel_aborts_the_read() {
        let dir = temp_dir("missing_channel");
        write_ramp_frames(&dir);
        let config = test_config(dir.clone());

        let channels = vec!["K1:PEM-ABSENT".to_string()];
        let err = read_data(&config, &channels, 100.0).unwrap_err();
        assert!(err.to_string().contains("K1:PEM-ABSENT"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn write_short_strain_frame(dir: &Path, frame_start: i64, samples: &[f64]) {
        let path = frame::frame_path(dir, frame_start);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(b"KFRM");
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&frame_start.to_le_bytes());
        buf.extend_from_slice(&(FRAME_SPAN_SECONDS as i32).to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        let mut name = [0u8; 64];
        name[..9].copy_from_slice(b"K1:STRAIN");
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&16.0f64.to_le_bytes());
        buf.extend_from_slice(&(samples.len() as i64).to_le_bytes());
        for value in samples {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::write(&path, &buf).unwrap();
    }

    #[test]
    fn short_frame_payload_aborts_the_read() {
        let dir = temp_dir("short_payload");
        // Frame 96 carries only 500 of the 512 samples a 32 s frame at
        // 16 Hz holds; frame 128 is complete. Stitching would absorb the
        // deficit and shift every later sample, so the read has to fail.
        let short: Vec<f64> = (0..500).map(|i| i as f64).collect();
        write_short_strain_frame(&dir, 96, &short);
        let path = frame::frame_path(&dir, 128);
        let mut writer = FrameWriter::create(&path, 128).unwrap();
        let strain: Vec<f64> = (512..1024).map(|i| i as f64).collect();
        writer.write_channel("K1:STRAIN", 16.0, &strain).unwrap();
        writer.finalize().unwrap();

        let config = test_config(dir.clone());
        let err = read_data(&config, &[], 100.0).unwrap_err();
        assert!(err.to_string().contains("500 samples instead of 512"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_frame_file_aborts_the_read() {
        let dir = temp_dir("missing_file");
        write_ramp_frames(&dir);
        let config = test_config(dir.clone());

        let channels = vec!["K1:PEM-W1".to_string()];
        assert!(read_data(&config, &channels, 200.0).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
