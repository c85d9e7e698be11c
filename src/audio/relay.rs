use bytes::Bytes;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MusicError, MusicResult};

pub const CHUNK_SIZE: usize = 4096;
/// Bloques retenidos durante la pausa antes de dejar de leer de yt-dlp.
pub const MAX_PAUSED_CHUNKS: usize = 10;
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Tasa de referencia para espaciar el backlog al reanudar.
pub const PACING_REFERENCE_RATE: f64 = 44_100.0;

/// Bandera de pausa compartida entre el motor y el relay.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Devuelve el estado anterior.
    pub fn set(&self, paused: bool) -> bool {
        self.0.swap(paused, Ordering::AcqRel)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Bloques del backlog enviados con espera tras una pausa
    pub paced_chunks: usize,
}

/// Espera tras enviar un bloque del backlog, como si fuera audio a 44.1kHz.
pub fn pacing_delay(len: usize) -> Duration {
    Duration::from_secs_f64(len as f64 / PACING_REFERENCE_RATE)
}

/// Copia `source` en `sink` en bloques de [`CHUNK_SIZE`] respetando la pausa.
///
/// En pausa los bloques leídos se acumulan; al llegar a [`MAX_PAUSED_CHUNKS`]
/// se deja de leer (consultando cada [`PAUSE_POLL_INTERVAL`]), lo que frena al
/// productor. Al reanudar se vacía primero el backlog, con [`pacing_delay`]
/// tras cada bloque. Termina cuando la fuente se agota y no queda backlog, o
/// con [`MusicError::StreamCancelled`] si se cancela.
pub async fn relay<R, W>(
    source: &mut R,
    sink: &mut W,
    pause: &PauseFlag,
    cancel: &CancellationToken,
) -> MusicResult<RelayStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut backlog: VecDeque<Bytes> = VecDeque::with_capacity(MAX_PAUSED_CHUNKS);
    let mut stats = RelayStats::default();
    let mut source_done = false;
    let mut was_paused = false;

    loop {
        if cancel.is_cancelled() {
            return Err(MusicError::StreamCancelled);
        }

        // Primero el backlog acumulado
        while !pause.is_paused() {
            let Some(chunk) = backlog.pop_front() else {
                break;
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(MusicError::StreamCancelled),
                written = sink.write_all(&chunk) => written?,
            }
            stats.bytes_written += chunk.len() as u64;

            if was_paused {
                stats.paced_chunks += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MusicError::StreamCancelled),
                    _ = tokio::time::sleep(pacing_delay(chunk.len())) => {}
                }
            }
        }

        if backlog.is_empty() {
            if source_done {
                break;
            }
            if !pause.is_paused() {
                was_paused = false;
            }
        }

        if pause.is_paused() {
            was_paused = true;
            if source_done || backlog.len() >= MAX_PAUSED_CHUNKS {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MusicError::StreamCancelled),
                    _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
                }
                continue;
            }
        }

        if !source_done {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(MusicError::StreamCancelled),
                read = source.read(&mut buffer) => read?,
            };

            if read == 0 {
                debug!("📭 Fuente agotada ({} bytes leídos)", stats.bytes_read);
                source_done = true;
            } else {
                stats.bytes_read += read as u64;
                backlog.push_back(Bytes::copy_from_slice(&buffer[..read]));
            }
        }
    }

    sink.flush().await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::{
        pin::Pin,
        sync::atomic::AtomicUsize,
        task::{Context, Poll},
    };
    use tokio::io::ReadBuf;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Fuente finita que cuenta lo leído y cede el turno antes de cada lectura.
    struct CountingSource {
        data: Vec<u8>,
        offset: usize,
        read: Arc<AtomicUsize>,
        yielded: bool,
    }

    impl CountingSource {
        fn new(data: Vec<u8>, read: Arc<AtomicUsize>) -> Self {
            Self {
                data,
                offset: 0,
                read,
                yielded: false,
            }
        }
    }

    impl AsyncRead for CountingSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if !self.yielded {
                self.yielded = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            self.yielded = false;

            let offset = self.offset;
            let n = (self.data.len() - offset).min(buf.remaining());
            buf.put_slice(&self.data[offset..offset + n]);
            self.offset += n;
            self.read.fetch_add(n, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl AsyncWrite for SharedSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn copies_everything_when_not_paused() {
        let data = payload(50_000);
        let mut source: &[u8] = &data;
        let mut sink = Vec::new();

        let stats = relay(&mut source, &mut sink, &PauseFlag::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.bytes_read, 50_000);
        assert_eq!(stats.bytes_written, 50_000);
        assert_eq!(stats.paced_chunks, 0);
        assert_eq!(sink, data);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stalls_source_and_loses_nothing() {
        let data = payload(100_000);
        let read = Arc::new(AtomicUsize::new(0));
        let sink = SharedSink::default();
        let pause = PauseFlag::default();
        pause.set(true);

        let task = {
            let mut source = CountingSource::new(data.clone(), read.clone());
            let mut sink = sink.clone();
            let pause = pause.clone();
            tokio::spawn(async move {
                relay(&mut source, &mut sink, &pause, &CancellationToken::new()).await
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;

        // Backlog lleno: no se sigue leyendo y nada llega al transcoder
        assert_eq!(read.load(Ordering::SeqCst), MAX_PAUSED_CHUNKS * CHUNK_SIZE);
        assert!(sink.0.lock().is_empty());

        assert!(pause.set(false));
        let stats = task.await.unwrap().unwrap();

        assert_eq!(stats.bytes_read, data.len() as u64);
        assert_eq!(stats.bytes_written, stats.bytes_read);
        assert_eq!(stats.paced_chunks, MAX_PAUSED_CHUNKS);
        assert_eq!(*sink.0.lock(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_midway_keeps_byte_count() {
        let data = payload(64 * CHUNK_SIZE + 123);
        let read = Arc::new(AtomicUsize::new(0));
        let sink = SharedSink::default();
        let pause = PauseFlag::default();

        let task = {
            let mut source = CountingSource::new(data.clone(), read.clone());
            let mut sink = sink.clone();
            let pause = pause.clone();
            tokio::spawn(async move {
                relay(&mut source, &mut sink, &pause, &CancellationToken::new()).await
            })
        };

        tokio::task::yield_now().await;
        pause.set(true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        pause.set(false);

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.bytes_read, data.len() as u64);
        assert_eq!(stats.bytes_written, data.len() as u64);
        assert_eq!(*sink.0.lock(), data);
    }

    #[tokio::test]
    async fn cancellation_stops_a_stalled_relay() {
        let (_writer, mut source) = tokio::io::duplex(64);
        let mut sink = Vec::new();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let result = relay(&mut source, &mut sink, &PauseFlag::default(), &cancel).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(MusicError::StreamCancelled)));
    }

    #[test]
    fn pacing_matches_reference_rate() {
        let delay = pacing_delay(CHUNK_SIZE);
        assert_eq!(delay.as_millis(), 92);
        assert_eq!(pacing_delay(44_100), Duration::from_secs(1));
    }
}
