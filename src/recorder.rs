use crate::engine::RunToken;
use crate::field::FieldStore;
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use reaction_common::FieldFrame;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Display consumer: snapshots the current grid on its own thread at a fixed interval.
///
/// Frames go to disk as a little-endian `u32` frame count followed by the
/// bincode-encoded frames. The count is rewritten when the recorder finishes.
pub struct FrameRecorder {
    handle: JoinHandle<Result<usize>>,
    path: PathBuf,
}

impl FrameRecorder {
    pub fn spawn<P: AsRef<Path>>(
        field: Arc<FieldStore>,
        path: P,
        interval: Duration,
        max_frames: usize,
        token: RunToken,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| anyhow!("Failed to create frame file '{}': {}", path.display(), e))?;
        let thread_path = path.clone();
        let handle = thread::Builder::new()
            .name("rd-recorder".to_string())
            .spawn(move || record(field, file, &thread_path, interval, max_frames, token))
            .map_err(|e| anyhow!("Failed to start recorder thread: {}", e))?;
        info!(
            "Recording up to {} frames every {} ms to {}",
            max_frames,
            interval.as_millis(),
            path.display()
        );
        Ok(Self { handle, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the recorder to stop (the token must be cancelled or the
    /// frame limit reached) and returns the number of frames written.
    pub fn finish(self) -> Result<usize> {
        self.handle
            .join()
            .map_err(|_| anyhow!("recorder thread panicked"))?
    }
}

fn record(
    field: Arc<FieldStore>,
    file: File,
    path: &Path,
    interval: Duration,
    max_frames: usize,
    token: RunToken,
) -> Result<usize> {
    let mut writer = BufWriter::new(file);
    writer.write_all(&0u32.to_le_bytes())?;

    let mut written: u32 = 0;
    let mut last_generation = None;
    loop {
        let running = token.is_running();
        // One final frame after cancellation so the last state is always kept.
        let frame = field.snapshot()?;
        if last_generation != Some(frame.tick) {
            last_generation = Some(frame.tick);
            write_frame(&mut writer, &frame)?;
            written += 1;
        }
        if written as usize >= max_frames {
            warn!("Frame limit {} reached, recorder stops early.", max_frames);
            break;
        }
        if !running {
            break;
        }
        thread::sleep(interval);
    }

    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&written.to_le_bytes())?;
    writer.flush()?;
    debug!("Recorder wrote {} frames to {}", written, path.display());
    Ok(written as usize)
}

fn write_frame<W: Write>(writer: &mut W, frame: &FieldFrame) -> Result<()> {
    bincode::serialize_into(writer, frame)
        .map_err(|e| anyhow!("Failed to encode frame at tick {}: {}", frame.tick, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use reaction_common::read_frames;
    use reaction_common::Vec4;

    #[test]
    fn cancelled_recorder_keeps_final_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");
        let field = Arc::new(FieldStore::new(Grid::filled(4, 4, Vec4::new(0.0, 0.0, 0.0, 1.0)).unwrap()));
        let token = RunToken::new();
        token.cancel();
        let recorder = FrameRecorder::spawn(Arc::clone(&field), &path, Duration::from_millis(1), 10, token).unwrap();
        assert_eq!(recorder.finish().unwrap(), 1);

        let frames = read_frames(&path).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!((frames[0].width, frames[0].height), (4, 4));
        assert_eq!(frames[0].cells.len(), 16);
    }

    #[test]
    fn unchanged_field_is_recorded_once_and_changes_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");
        let field = Arc::new(FieldStore::new(Grid::filled(2, 2, Vec4::zero()).unwrap()));
        let token = RunToken::new();
        let recorder =
            FrameRecorder::spawn(Arc::clone(&field), &path, Duration::from_millis(2), 100, token.clone()).unwrap();
        thread::sleep(Duration::from_millis(20));
        field.swap();
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(recorder.finish().unwrap(), 2);

        let ticks: Vec<u64> = read_frames(&path).unwrap().iter().map(|f| f.tick).collect();
        assert_eq!(ticks, vec![0, 1]);
    }

    #[test]
    fn frame_limit_stops_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");
        let field = Arc::new(FieldStore::new(Grid::filled(2, 2, Vec4::zero()).unwrap()));
        let recorder =
            FrameRecorder::spawn(Arc::clone(&field), &path, Duration::from_millis(1), 1, RunToken::new()).unwrap();
        assert_eq!(recorder.finish().unwrap(), 1);
        assert_eq!(read_frames(&path).unwrap().len(), 1);
    }
}
