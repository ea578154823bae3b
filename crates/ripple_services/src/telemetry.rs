//! Per-frame telemetry sinks

use ripple_core::{FrameObserver, FrameView};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes one CSV row per simulated frame: `frame,ρ_0,ρ_1,...`.
///
/// Warm-up frames and frames without density readback are skipped. The
/// first write failure is logged and turns the sink off; the run goes on.
pub struct DensityCsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: u64,
}

impl DensityCsvSink {
    /// Create (or truncate) the CSV file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        tracing::info!("density log: {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            rows: 0,
        })
    }

    /// Flush buffered rows to disk.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                self.disable(&e);
            }
        }
    }

    fn disable(&mut self, error: &io::Error) {
        tracing::warn!("density log {} disabled: {error}", self.path.display());
        self.writer = None;
    }
}

fn write_row(writer: &mut impl Write, frame: u64, densities: &[f32]) -> io::Result<()> {
    write!(writer, "{frame}")?;
    for rho in densities {
        write!(writer, ",{rho}")?;
    }
    writeln!(writer)
}

impl FrameObserver for DensityCsvSink {
    fn on_frame(&mut self, view: &FrameView<'_>) {
        if view.warmup || view.densities.is_empty() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match write_row(writer, view.frame, view.densities) {
            Ok(()) => self.rows += 1,
            Err(e) => self.disable(&e),
        }
    }
}

impl Drop for DensityCsvSink {
    fn drop(&mut self) {
        self.flush();
        tracing::debug!(rows = self.rows, "density log {} closed", self.path.display());
    }
}
