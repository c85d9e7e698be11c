//! Frontera con el transporte de voz.
//!
//! El motor sólo necesita unirse a un canal, abrir un flujo de salida PCM
//! (s16le estéreo a 48kHz) y cerrar la sesión. [`SongbirdTransport`] lo
//! implementa sobre songbird entregando el audio como una entrada en vivo.

use async_trait::async_trait;
use flume::{Receiver, RecvTimeoutError, Sender};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{Input, RawAdapter},
    tracks::{PlayMode, TrackHandle},
    Call, Songbird,
};
use std::{
    io::{Read, Seek, SeekFrom},
    sync::Arc,
    time::Duration,
};
use symphonia::core::io::MediaSource;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::args::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::error::{MusicError, MusicResult};

/// Bloques PCM en vuelo entre el transcoder y el mezclador de songbird.
const PCM_CHANNEL_CAPACITY: usize = 64;
/// Espera máxima del mezclador antes de rellenar con silencio.
const SILENCE_TIMEOUT: Duration = Duration::from_millis(5);
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bytes de un frame estéreo en f32.
const FRAME_BYTES: usize = 4 * OUTPUT_CHANNELS as usize;
const S16_FRAME_BYTES: usize = 2 * OUTPUT_CHANNELS as usize;

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<Arc<dyn VoiceSession>>;
}

#[async_trait]
pub trait VoiceSession: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    /// Abre un flujo nuevo; uno por canción.
    async fn create_output_stream(&self) -> MusicResult<Box<dyn PcmSink>>;

    async fn close(&self);
}

/// Destino del PCM s16le estéreo a 48kHz.
#[async_trait]
pub trait PcmSink: Send {
    async fn write(&mut self, pcm: &[u8]) -> MusicResult<()>;

    /// Marca el fin del flujo y espera a que el audio pendiente se reproduzca.
    async fn flush(&mut self) -> MusicResult<()>;

    /// Corta el flujo sin esperar.
    fn abort(&mut self);
}

/// Transporte de voz respaldado por songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<Arc<dyn VoiceSession>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Voice(format!("no se pudo unir al canal {}: {}", channel_id, e)))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdSession {
            manager: self.manager.clone(),
            guild_id,
            channel_id,
            call,
        }))
    }
}

struct SongbirdSession {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn create_output_stream(&self) -> MusicResult<Box<dyn PcmSink>> {
        let (tx, rx) = flume::bounded(PCM_CHANNEL_CAPACITY);
        let reader = PcmReader::new(rx);

        let input = Input::from(RawAdapter::new(reader, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS));
        let track = self.call.lock().await.play_input(input);

        Ok(Box::new(SongbirdSink {
            tx: Some(tx),
            track,
            carry: Vec::with_capacity(1),
        }))
    }

    async fn close(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Cerrar voz en guild {}: {}", self.guild_id, e);
        }
        info!("👋 Desconectado del canal de voz {}", self.channel_id);
    }
}

/// Convierte s16le a f32le. Los bytes de un frame estéreo incompleto se
/// guardan en `carry` para la siguiente llamada.
pub fn s16le_to_f32le(carry: &mut Vec<u8>, pcm: &[u8]) -> Vec<u8> {
    let mut data = std::mem::take(carry);
    data.extend_from_slice(pcm);

    let aligned = data.len() - data.len() % S16_FRAME_BYTES;
    let mut out = Vec::with_capacity(aligned * 2);
    for sample in data[..aligned].chunks_exact(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as f32 / 32768.0;
        out.extend_from_slice(&value.to_le_bytes());
    }
    carry.extend_from_slice(&data[aligned..]);

    out
}

struct SongbirdSink {
    tx: Option<Sender<Vec<u8>>>,
    track: TrackHandle,
    carry: Vec<u8>,
}

#[async_trait]
impl PcmSink for SongbirdSink {
    async fn write(&mut self, pcm: &[u8]) -> MusicResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| MusicError::Voice("el flujo de salida ya está cerrado".into()))?;

        let samples = s16le_to_f32le(&mut self.carry, pcm);
        if samples.is_empty() {
            return Ok(());
        }

        tx.send_async(samples)
            .await
            .map_err(|_| MusicError::Voice("songbird cerró la pista".into()))
    }

    async fn flush(&mut self) -> MusicResult<()> {
        // Sin emisor el lector devuelve EOF cuando vacía el canal
        self.tx = None;

        loop {
            match self.track.get_info().await {
                Ok(state) if matches!(state.playing, PlayMode::Play | PlayMode::Pause) => {
                    tokio::time::sleep(FINISH_POLL_INTERVAL).await;
                }
                Ok(_) | Err(_) => return Ok(()),
            }
        }
    }

    fn abort(&mut self) {
        self.tx = None;
        if let Err(e) = self.track.stop() {
            warn!("⚠️ No se pudo detener la pista de voz: {}", e);
        }
    }
}

/// Lector bloqueante que songbird consume desde su hilo de mezcla.
///
/// Si no llega audio a tiempo entrega silencio para no frenar al mezclador.
struct PcmReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl PcmReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for PcmReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.offset >= self.pending.len() {
            match self.rx.recv_timeout(SILENCE_TIMEOUT) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let len = (buf.len() / FRAME_BYTES * FRAME_BYTES).max(buf.len().min(FRAME_BYTES));
                    buf[..len].fill(0);
                    return Ok(len);
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Seek for PcmReader {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "el flujo PCM en vivo no admite seek",
        ))
    }
}

impl MediaSource for PcmReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Transporte en memoria para pruebas del motor y del pipeline.
#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    pub struct Recorded {
        pub pcm: SyncMutex<Vec<u8>>,
        pub streams: AtomicUsize,
        pub flushes: AtomicUsize,
        pub aborts: AtomicUsize,
        pub joins: AtomicUsize,
        pub closes: AtomicUsize,
    }

    impl Recorded {
        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[derive(Default, Clone)]
    pub struct MemoryTransport {
        pub recorded: Arc<Recorded>,
    }

    #[async_trait]
    impl VoiceTransport for MemoryTransport {
        async fn join(&self, _guild_id: GuildId, channel_id: ChannelId) -> MusicResult<Arc<dyn VoiceSession>> {
            self.recorded.joins.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemorySession {
                channel_id,
                recorded: self.recorded.clone(),
            }))
        }
    }

    pub struct MemorySession {
        pub channel_id: ChannelId,
        pub recorded: Arc<Recorded>,
    }

    #[async_trait]
    impl VoiceSession for MemorySession {
        fn channel_id(&self) -> ChannelId {
            self.channel_id
        }

        async fn create_output_stream(&self) -> MusicResult<Box<dyn PcmSink>> {
            self.recorded.streams.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemorySink {
                recorded: self.recorded.clone(),
            }))
        }

        async fn close(&self) {
            self.recorded.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub struct MemorySink {
        pub recorded: Arc<Recorded>,
    }

    #[async_trait]
    impl PcmSink for MemorySink {
        async fn write(&mut self, pcm: &[u8]) -> MusicResult<()> {
            self.recorded.pcm.lock().extend_from_slice(pcm);
            Ok(())
        }

        async fn flush(&mut self) -> MusicResult<()> {
            self.recorded.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&mut self) {
            self.recorded.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn converts_samples_to_unit_range() {
        let mut carry = Vec::new();
        let pcm: Vec<u8> = [0i16, 16384, -32768, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let out = s16le_to_f32le(&mut carry, &pcm);
        assert_eq!(f32s(&out), vec![0.0, 0.5, -1.0, 0.0]);
        assert!(carry.is_empty());
    }

    #[test]
    fn partial_frame_is_carried_to_next_write() {
        let mut carry = Vec::new();
        let frame: Vec<u8> = [16384i16, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let first = s16le_to_f32le(&mut carry, &frame[..3]);
        assert!(first.is_empty());
        assert_eq!(carry.len(), 3);

        let second = s16le_to_f32le(&mut carry, &frame[3..]);
        assert_eq!(f32s(&second), vec![0.5, -0.5]);
        assert!(carry.is_empty());
    }

    #[test]
    fn reader_drains_chunks_then_hits_eof() {
        let (tx, rx) = flume::bounded(4);
        let mut reader = PcmReader::new(rx);
        tx.send(vec![1u8; 10]).unwrap();
        drop(tx);

        let mut buf = [0u8; 6];
        assert_eq!(reader.read(&mut buf).unwrap(), 6);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn reader_fills_silence_while_starved() {
        let (_tx, rx) = flume::bounded::<Vec<u8>>(4);
        let mut reader = PcmReader::new(rx);

        let mut buf = [7u8; 20];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert!(buf[..n].iter().all(|b| *b == 0));
    }
}
