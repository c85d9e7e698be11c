use regex::Regex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, LazyLock,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::MusicError;

static TIME_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(?:(\d+):)?(\d+):(\d+(?:\.\d+)?)").expect("time regex is valid")
});

/// Extrae `time=HH:MM:SS.ff` o `time=MM:SS.ff` de una línea de progreso de FFmpeg.
pub fn parse_time_token(line: &str) -> Option<f64> {
    let captures = TIME_TOKEN.captures(line)?;
    let hours: f64 = captures
        .get(1)
        .map_or(Ok(0.0), |h| h.as_str().parse())
        .ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `true` si la línea es un error real y no sólo diagnóstico.
pub fn is_error_line(line: &str) -> bool {
    line.to_ascii_lowercase().contains("[error]")
}

/// Posición de reproducción en segundos, compartida con el lector de FFmpeg.
#[derive(Debug, Default)]
pub struct PlaybackPosition(AtomicU64);

impl PlaybackPosition {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Resultado de leer stderr de un proceso hasta EOF o cancelación.
#[derive(Debug, Default)]
pub struct StderrReport {
    pub lines: usize,
    /// Líneas marcadas con `[error]`; no abortan la canción.
    pub errors: Vec<MusicError>,
}

/// Lee stderr línea a línea: todo en debug, `[error]` en error y, si se pasa
/// `position`, actualiza la posición con cada token `time=`.
pub async fn read_error_stream<R>(
    stream: R,
    process: &'static str,
    position: Option<Arc<PlaybackPosition>>,
    cancel: CancellationToken,
) -> StderrReport
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    let mut report = StderrReport::default();

    loop {
        buffer.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\r', &mut buffer) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("{} stderr cerrado con error: {}", process, e);
                break;
            }
        }

        // FFmpeg termina las líneas de progreso con '\r' y el resto con '\n'
        let text = String::from_utf8_lossy(&buffer);
        for segment in text.split(['\r', '\n']).filter(|s| !s.trim().is_empty()) {
            debug!("{} ErrorStream: {}", process, segment);
            report.lines += 1;

            if is_error_line(segment) {
                error!("❌ {} Error: {}", process, segment);
                report.errors.push(MusicError::UpstreamProcessError {
                    process,
                    line: segment.to_string(),
                });
            }

            if let Some(position) = &position {
                if let Some(seconds) = parse_time_token(segment) {
                    position.set(seconds);
                }
            }
        }
    }

    report
}
