use crate::snapshot::{FieldFrame, SweepReport};
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Reads a frame file: a `u32` frame count followed by bincode frames.
///
/// A file cut short (the engine was killed mid-recording) keeps the frames
/// that decoded completely.
pub fn read_frames<P: AsRef<Path>>(path: P) -> Result<Vec<FieldFrame>> {
    let path = path.as_ref();
    let input_file = File::open(path)
        .with_context(|| format!("Failed to open frame file: {}", path.display()))?;
    let mut reader = BufReader::new(input_file);

    // Read the frame count as u32 to match how it was written
    let frame_count: u32 = bincode::deserialize_from(&mut reader)
        .context("Failed to read frame count from header")?;
    info!("Found {} frames in {}", frame_count, path.display());

    let mut frames = Vec::with_capacity(frame_count as usize);
    for i in 0..frame_count {
        match bincode::deserialize_from::<_, FieldFrame>(&mut reader) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                error!("Error deserializing frame {}: {}", i, e);
                warn!("Keeping the {} frames read so far.", frames.len());
                break;
            }
        }
    }
    Ok(frames)
}

/// Reads a sweep report, picking the decoder from the file extension:
/// `.json`, `.bin` (bincode) or `.msgpack`.
pub fn load_report<P: AsRef<Path>>(path: P) -> Result<SweepReport> {
    let path = path.as_ref();
    let extension = path.extension().and_then(|e| e.to_str());
    if !matches!(extension, Some("json" | "bin" | "msgpack")) {
        bail!("Unsupported report extension {:?} (expected .json, .bin or .msgpack)", extension);
    }
    let file = File::open(path).with_context(|| format!("Failed to open report: {}", path.display()))?;
    let reader = BufReader::new(file);
    match extension {
        Some("bin") => bincode::deserialize_from(reader).context("Failed to decode bincode report"),
        Some("msgpack") => rmp_serde::decode::from_read(reader).context("Failed to decode MessagePack report"),
        _ => serde_json::from_reader(reader).context("Failed to decode JSON report"),
    }
}
