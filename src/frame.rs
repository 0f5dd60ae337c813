use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[cfg(test)]
use std::io::{BufWriter, Write};

use crate::utils::DynError;

/// Span of one frame file in seconds.
pub const FRAME_SPAN_SECONDS: i64 = 32;
/// Frame timestamps are sharded into directories of this many seconds.
pub const SHARD_SPAN_SECONDS: i64 = 100_000;

const FILE_HEADER_SIZE: usize = 24;
const FRAME_MAGIC: [u8; 4] = *b"KFRM";
const FRAME_VERSION: i32 = 1;
const CHANNEL_COUNT_OFFSET: u64 = 20;
const CHANNEL_HEADER_SIZE: usize = 80;
const CHANNEL_NAME_LEN: usize = 64;

/// Path of the frame file starting at `frame_start` (32-second aligned GPS
/// seconds) under the site frame root: `<folder>/<shard>/K-K1_R-<j>-32.raw`.
pub fn frame_path(folder: &Path, frame_start: i64) -> PathBuf {
    folder
        .join(format!("{}", frame_start / SHARD_SPAN_SECONDS))
        .join(format!("K-K1_R-{}-{}.raw", frame_start, FRAME_SPAN_SECONDS))
}

#[cfg(test)]
fn write_i32_le(buf: &mut [u8], offset: usize, value: i32) {
    if offset + 4 <= buf.len() {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
fn write_i64_le(buf: &mut [u8], offset: usize, value: i64) {
    if offset + 8 <= buf.len() {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
fn write_f64_le(buf: &mut [u8], offset: usize, value: f64) {
    if offset + 8 <= buf.len() {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
fn write_fixed_ascii(buf: &mut [u8], offset: usize, len: usize, value: &str) {
    if offset + len > buf.len() {
        return;
    }
    let dst = &mut buf[offset..offset + len];
    dst.fill(0);
    let src = value.as_bytes();
    let n = src.len().min(len);
    dst[..n].copy_from_slice(&src[..n]);
}

fn read_i32_le(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_i64_le(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ])
}

fn read_f64_le(buf: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ])
}

fn fixed_ascii_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// Writes one frame file. Channel count is patched into the header on
/// finalize, so channels can be appended without knowing the total upfront.
/// The analysis path only reads frames; the writer builds test fixtures.
#[cfg(test)]
pub struct FrameWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    channels_written: i32,
}

#[cfg(test)]
impl FrameWriter {
    pub fn create(path: &Path, frame_start: i64) -> Result<Self, DynError> {
        if frame_start % FRAME_SPAN_SECONDS != 0 {
            return Err(format!(
                "Frame start {frame_start} is not aligned to {FRAME_SPAN_SECONDS} s"
            )
            .into());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut header = [0u8; FILE_HEADER_SIZE];
        header[0..4].copy_from_slice(&FRAME_MAGIC);
        write_i32_le(&mut header, 4, FRAME_VERSION);
        write_i64_le(&mut header, 8, frame_start);
        write_i32_le(&mut header, 16, FRAME_SPAN_SECONDS as i32);
        writer.write_all(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            channels_written: 0,
        })
    }

    pub fn write_channel(
        &mut self,
        name: &str,
        sample_rate: f64,
        samples: &[f64],
    ) -> Result<(), DynError> {
        if name.len() > CHANNEL_NAME_LEN {
            return Err(format!("Channel name exceeds {CHANNEL_NAME_LEN} bytes: {name}").into());
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(format!("Sample rate must be positive for channel {name}").into());
        }
        let expected = (sample_rate * FRAME_SPAN_SECONDS as f64).round() as usize;
        if samples.len() != expected {
            return Err(format!(
                "Channel {name} carries {} samples, expected {expected} for a \
                 {FRAME_SPAN_SECONDS} s frame at {sample_rate} Hz",
                samples.len()
            )
            .into());
        }

        let mut header = [0u8; CHANNEL_HEADER_SIZE];
        write_fixed_ascii(&mut header, 0, CHANNEL_NAME_LEN, name);
        write_f64_le(&mut header, 64, sample_rate);
        write_i64_le(&mut header, 72, samples.len() as i64);
        self.writer.write_all(&header)?;
        for value in samples {
            self.writer.write_all(&value.to_le_bytes())?;
        }
        self.channels_written += 1;
        Ok(())
    }

    pub fn finalize(mut self) -> Result<PathBuf, DynError> {
        self.writer.flush()?;
        {
            let file = self.writer.get_mut();
            file.seek(SeekFrom::Start(CHANNEL_COUNT_OFFSET))?;
            file.write_all(&self.channels_written.to_le_bytes())?;
            file.flush()?;
        }
        Ok(self.path)
    }
}

#[derive(Debug)]
pub struct FrameChannel {
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

#[derive(Debug)]
pub struct Frame {
    pub frame_start: i64,
    pub span_seconds: i32,
    pub channels: HashMap<String, FrameChannel>,
}

/// Reads the channels named in `wanted` from one frame file; payloads of
/// other channels are seeked over without being loaded. A loaded channel
/// must carry exactly span × rate samples.
pub fn read_frame(path: &Path, wanted: &HashSet<&str>) -> Result<Frame, DynError> {
    let file =
        File::open(path).map_err(|e| format!("Failed to open frame file {}: {e}", path.display()))?;
    let file_len = file
        .metadata()
        .map_err(|e| format!("Failed to stat frame file {}: {e}", path.display()))?
        .len();
    let mut reader = BufReader::new(file);

    let mut header = [0u8; FILE_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| format!("Failed to read frame header of {}: {e}", path.display()))?;
    if header[0..4] != FRAME_MAGIC {
        return Err(format!("{} is not a frame file (bad magic)", path.display()).into());
    }
    let version = read_i32_le(&header, 4);
    if version != FRAME_VERSION {
        return Err(format!("Unsupported frame version {version} in {}", path.display()).into());
    }
    let frame_start = read_i64_le(&header, 8);
    let span_seconds = read_i32_le(&header, 16);
    let channel_count = read_i32_le(&header, CHANNEL_COUNT_OFFSET as usize);
    if span_seconds <= 0 || channel_count < 0 {
        return Err(format!("Corrupt frame header in {}", path.display()).into());
    }

    let mut channels = HashMap::new();
    let mut channel_header = [0u8; CHANNEL_HEADER_SIZE];
    for _ in 0..channel_count {
        reader
            .read_exact(&mut channel_header)
            .map_err(|e| format!("Truncated channel header in {}: {e}", path.display()))?;
        let name = fixed_ascii_to_string(&channel_header[0..CHANNEL_NAME_LEN]);
        let sample_rate = read_f64_le(&channel_header, 64);
        let sample_count = read_i64_le(&channel_header, 72);
        // A payload cannot be longer than the file that holds it.
        let byte_len = u64::try_from(sample_count)
            .ok()
            .and_then(|count| count.checked_mul(8))
            .filter(|len| *len <= file_len)
            .ok_or_else(|| {
                format!(
                    "Corrupt sample count {sample_count} for channel {name} in {}",
                    path.display()
                )
            })?;

        if wanted.contains(name.as_str()) {
            if !sample_rate.is_finite() || sample_rate <= 0.0 {
                return Err(format!(
                    "Invalid sample rate {sample_rate} for channel {name} in {}",
                    path.display()
                )
                .into());
            }
            let expected = (sample_rate * f64::from(span_seconds)).round() as i64;
            if sample_count != expected {
                return Err(format!(
                    "Channel {name} carries {sample_count} samples instead of {expected} \
                     for a {span_seconds} s frame at {sample_rate} Hz in {}",
                    path.display()
                )
                .into());
            }
            let mut payload = vec![0u8; byte_len as usize];
            reader.read_exact(&mut payload).map_err(|e| {
                format!("Truncated samples for channel {name} in {}: {e}", path.display())
            })?;
            let samples: Vec<f64> = payload
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect();
            channels.insert(
                name,
                FrameChannel {
                    sample_rate,
                    samples,
                },
            );
        } else {
            reader.seek(SeekFrom::Current(byte_len as i64))?;
        }
    }

    Ok(Frame {
        frame_start,
        span_seconds,
        channels,
    })
}
