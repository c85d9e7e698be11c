//! Motor de reproducción de una guild.
//!
//! Cada [`MusicEngine`] tiene su propia cola, estado de loop, pausa, volumen
//! y filtros. Como mucho una tarea de reproducción por motor consume la cola;
//! los comandos sólo tocan la cola y las banderas compartidas.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    filters::{AudioFilter, FilterChain, FilterToggle, MusicFilter},
    pipeline::{self, PipelineContext, PipelineReport, ProcessSet},
    process_log::PlaybackPosition,
    queue::{LoopMode, PlaybackQueue, QueuePage, TrackItem},
    relay::PauseFlag,
    resolver::{self, TrackResolver},
    voice::{VoiceSession, VoiceTransport},
};
use crate::{
    config::PlayerSettings,
    error::{MusicError, MusicResult},
};

/// Tiempo en el que se espera el aviso de un cierre propio.
const OWN_DISCONNECT_WINDOW: Duration = Duration::from_secs(10);

/// Canal de texto donde se anuncian los cambios de canción.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Resolving,
    AwaitingVoice,
    Streaming,
    Paused,
    Draining,
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub track: TrackItem,
    pub position_secs: f64,
    /// 0 si la duración es desconocida
    pub percent: f64,
}

/// Cancelación y procesos de la canción en curso.
struct ActivePlayback {
    cancel: CancellationToken,
    processes: Arc<ProcessSet>,
}

pub struct MusicEngine {
    guild_id: GuildId,
    settings: PlayerSettings,
    resolver: TrackResolver,
    transport: Arc<dyn VoiceTransport>,

    queue: PlaybackQueue,
    loop_mode: RwLock<LoopMode>,
    pause: PauseFlag,
    volume: RwLock<f32>,
    filters: FilterChain,
    position: Arc<PlaybackPosition>,
    current: RwLock<Option<TrackItem>>,
    state: RwLock<PlayerState>,
    playback: Mutex<Option<ActivePlayback>>,

    /// También serializa el arranque y el fin de la tarea de reproducción.
    voice: tokio::sync::Mutex<Option<Arc<dyn VoiceSession>>>,
    running: AtomicBool,
    own_disconnect: Mutex<Option<(ChannelId, Instant)>>,
    notifier: RwLock<Option<Arc<dyn Notifier>>>,
}

impl MusicEngine {
    pub fn new(guild_id: GuildId, settings: PlayerSettings, transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            guild_id,
            resolver: TrackResolver::new(&settings),
            transport,
            queue: PlaybackQueue::new(),
            loop_mode: RwLock::new(LoopMode::Off),
            pause: PauseFlag::default(),
            volume: RwLock::new(settings.default_volume),
            filters: FilterChain::new(),
            position: Arc::new(PlaybackPosition::default()),
            current: RwLock::new(None),
            state: RwLock::new(PlayerState::Idle),
            playback: Mutex::new(None),
            voice: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            own_disconnect: Mutex::new(None),
            notifier: RwLock::new(None),
            settings,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Los anuncios van al canal del último comando.
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.write() = Some(notifier);
    }

    async fn notify(&self, message: String) {
        let notifier = self.notifier.read().clone();
        match notifier {
            Some(notifier) => notifier.notify(message).await,
            None => debug!("Sin canal de texto para guild {}: {}", self.guild_id, message),
        }
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.write() = state;
    }

    pub fn state(&self) -> PlayerState {
        let state = *self.state.read();
        if state == PlayerState::Streaming && self.pause.is_paused() {
            PlayerState::Paused
        } else {
            state
        }
    }

    /// Resuelve `query` y la agrega a la cola; si no hay reproducción en
    /// curso se une a `channel_id` y la inicia.
    pub async fn play(self: &Arc<Self>, query: &str, channel_id: ChannelId) -> MusicResult<TrackItem> {
        let idle = !self.is_active();
        if idle {
            self.set_state(PlayerState::Resolving);
        }

        let track = match self.resolver.resolve(query).await {
            Ok(track) => track,
            Err(e) => {
                if idle && self.state() == PlayerState::Resolving {
                    self.set_state(PlayerState::Idle);
                }
                return Err(e);
            }
        };

        self.enqueue_and_start(track.clone(), channel_id).await?;
        Ok(track)
    }

    /// Igual que [`play`](Self::play) pero con un archivo local.
    pub async fn play_file(self: &Arc<Self>, path: &str, channel_id: ChannelId) -> MusicResult<TrackItem> {
        let track = resolver::resolve_local_file(path).await?;
        self.enqueue_and_start(track.clone(), channel_id).await?;
        Ok(track)
    }

    async fn enqueue_and_start(self: &Arc<Self>, track: TrackItem, channel_id: ChannelId) -> MusicResult<()> {
        let mut voice = self.voice.lock().await;
        self.queue.enqueue(track);

        let running = self.running.load(Ordering::Acquire);
        if running && voice.is_some() {
            return Ok(());
        }

        if voice.as_ref().map_or(true, |session| session.channel_id() != channel_id) {
            if let Some(previous) = voice.take() {
                self.close_session(previous).await;
            }

            self.set_state(PlayerState::AwaitingVoice);
            match self.transport.join(self.guild_id, channel_id).await {
                Ok(session) => *voice = Some(session),
                Err(e) => {
                    error!("❌ No se pudo conectar a voz en guild {}: {}", self.guild_id, e);
                    self.queue.clear();
                    self.set_state(PlayerState::Idle);
                    return Err(e);
                }
            }
        }

        if !running {
            self.running.store(true, Ordering::Release);
            let engine = Arc::clone(self);
            tokio::spawn(async move { engine.run_queue().await });
        }

        Ok(())
    }

    /// Consume la cola hasta vaciarla o perder el canal de voz.
    async fn run_queue(self: Arc<Self>) {
        info!("▶️ Reproducción iniciada en guild {}", self.guild_id);

        loop {
            self.force_stop_current();

            let session = {
                let voice = self.voice.lock().await;
                match voice.as_ref() {
                    Some(session) => session.clone(),
                    None => {
                        debug!("Sin canal de voz en guild {}, se vacía la cola", self.guild_id);
                        self.queue.clear();
                        self.running.store(false, Ordering::Release);
                        self.set_state(PlayerState::Idle);
                        break;
                    }
                }
            };

            let old_mode = self.loop_mode();
            let Some(track) = self.queue.advance(old_mode) else {
                let mut voice = self.voice.lock().await;
                if !self.queue.is_empty() {
                    continue;
                }

                self.running.store(false, Ordering::Release);
                self.set_state(PlayerState::Idle);
                if let Some(session) = voice.take() {
                    self.close_session(session).await;
                }
                drop(voice);

                self.reset_session_settings().await;
                info!("⏹️ Cola terminada en guild {}", self.guild_id);
                break;
            };

            let failed = match self.play_track(&session, &track).await {
                Ok(report) => {
                    self.set_state(PlayerState::Draining);
                    info!("✅ Terminado: {} ({} bytes PCM)", track.title, report.pcm_bytes);
                    self.notify(format!(
                        "> Reproducción terminada de [{}]({})",
                        track.title, track.source_ref
                    ))
                    .await;
                    false
                }
                Err(e) if e.is_cancelled() => {
                    debug!("Reproducción de {} cancelada", track.title);
                    false
                }
                Err(e) => {
                    error!("❌ Error reproduciendo {}: {}", track.title, e);
                    self.notify(format!("❌ Error reproduciendo {}: {}", track.title, e))
                        .await;
                    true
                }
            };

            // La canción terminó de una u otra forma: saltada, fallida o completa
            let new_mode = self.loop_mode();
            self.queue.reconcile(old_mode, new_mode, &track);

            // En loop de canción la cabeza se repetiría fallando sin fin
            if failed && new_mode == LoopMode::Track && self.queue.snapshot().first() == Some(&track) {
                warn!("⚠️ {} falló en loop de canción, se quita de la cola", track.title);
                self.queue.remove_first();
            }

            self.force_stop_current();
        }
    }

    async fn play_track(&self, session: &Arc<dyn VoiceSession>, track: &TrackItem) -> MusicResult<PipelineReport> {
        let cancel = CancellationToken::new();
        let processes = Arc::new(ProcessSet::new());
        *self.playback.lock() = Some(ActivePlayback {
            cancel: cancel.clone(),
            processes: processes.clone(),
        });
        *self.current.write() = Some(track.clone());
        self.position.reset();

        info!("🎵 Reproduciendo: {} ({})", track.title, track.source_ref);
        self.notify(format!(
            "> Comenzando reproducción de [{}]({})",
            track.title, track.source_ref
        ))
        .await;

        let mut sink = session.create_output_stream().await?;
        self.set_state(PlayerState::Streaming);

        let ctx = PipelineContext {
            pause: self.pause.clone(),
            position: self.position.clone(),
            processes,
            cancel,
        };
        let volume = *self.volume.read();
        let filters = self.filters.snapshot();

        pipeline::stream_track(&self.settings, track, volume, &filters, sink.as_mut(), &ctx).await
    }

    /// Cancela la canción actual y mata sus procesos. Síncrono e idempotente.
    fn force_stop_current(&self) {
        *self.current.write() = None;
        if let Some(active) = self.playback.lock().take() {
            active.processes.kill_all();
            active.cancel.cancel();
        }
    }

    /// Hay canción actual y al menos uno de sus procesos sigue vivo.
    pub fn is_playing(&self) -> bool {
        self.current.read().is_some()
            && self
                .playback
                .lock()
                .as_ref()
                .is_some_and(|active| active.processes.any_running())
    }

    /// Canal de voz al que está vinculado el motor.
    pub async fn voice_channel(&self) -> Option<ChannelId> {
        self.voice.lock().await.as_ref().map(|session| session.channel_id())
    }

    /// La tarea de reproducción está en marcha (aunque sea entre canciones).
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn skip(&self) -> MusicResult<()> {
        if !self.is_playing() {
            return Err(MusicError::NotPlaying);
        }
        self.force_stop_current();
        info!("⏭️ Canción saltada en guild {}", self.guild_id);
        Ok(())
    }

    /// Vacía la cola, corta la canción y sale del canal de voz.
    pub async fn stop(&self) {
        self.queue.clear();
        self.force_stop_current();
        self.pause.set(false);

        match self.leave_voice().await {
            Ok(()) => {}
            Err(MusicError::NoVoiceBinding) => debug!("stop sin canal de voz en guild {}", self.guild_id),
            Err(e) => warn!("⚠️ Error saliendo del canal de voz: {}", e),
        }
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
    }

    /// Cierra la sesión de voz; el volumen vuelve al valor por defecto y se
    /// desactivan los filtros.
    pub async fn leave_voice(&self) -> MusicResult<()> {
        let session = self.voice.lock().await.take().ok_or(MusicError::NoVoiceBinding)?;
        self.force_stop_current();
        self.close_session(session).await;
        self.reset_session_settings().await;
        Ok(())
    }

    /// Cierra la sesión y anota el canal: el aviso de desconexión que
    /// provoca este cierre no debe detener una sesión posterior.
    async fn close_session(&self, session: Arc<dyn VoiceSession>) {
        *self.own_disconnect.lock() = Some((session.channel_id(), Instant::now()));
        session.close().await;
    }

    /// Aviso de que el bot salió de `left`. Si no lo provocó el propio motor
    /// y sigue vinculado a ese canal, se detiene todo. Devuelve `true` si se
    /// detuvo.
    pub async fn handle_voice_disconnect(&self, left: Option<ChannelId>) -> bool {
        let own = self.own_disconnect.lock().take();
        if let Some((channel_id, closed_at)) = own {
            if left == Some(channel_id) && closed_at.elapsed() < OWN_DISCONNECT_WINDOW {
                debug!("Desconexión propia de {} en guild {}", channel_id, self.guild_id);
                return false;
            }
        }

        let bound = self.voice_channel().await;
        if !disconnect_applies(left, bound) {
            debug!(
                "Desconexión de {:?} ignorada en guild {}: vinculado a {:?}",
                left, self.guild_id, bound
            );
            return false;
        }

        info!("🔌 Bot desconectado en guild {}", self.guild_id);
        self.stop().await;
        // La sesión ya estaba cerrada por Discord, no llegará otro aviso
        self.own_disconnect.lock().take();
        true
    }

    async fn reset_session_settings(&self) {
        *self.volume.write() = self.settings.default_volume;
        if self.filters.clear() {
            self.notify("Todos los filtros se han desactivado".to_string()).await;
        }
    }

    pub fn pause(&self) -> MusicResult<()> {
        if !self.is_playing() {
            return Err(MusicError::NotPlaying);
        }
        if self.pause.set(true) {
            return Err(MusicError::AlreadyPaused);
        }
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(())
    }

    pub fn resume(&self) -> MusicResult<()> {
        if !self.is_playing() {
            return Err(MusicError::NotPlaying);
        }
        if !self.pause.set(false) {
            return Err(MusicError::NotPaused);
        }
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(())
    }

    pub fn volume_percent(&self) -> u32 {
        (*self.volume.read() * 100.0).round() as u32
    }

    /// Sin valor devuelve el volumen actual. Los usuarios normales están
    /// limitados a `0..=max_volume_percent`; los privilegiados sólo a >= 0.
    /// El cambio se aplica desde la siguiente canción.
    pub fn set_volume(&self, percent: Option<i64>, privileged: bool) -> MusicResult<u32> {
        let Some(percent) = percent else {
            return Ok(self.volume_percent());
        };

        let max = self.settings.max_volume_percent;
        if percent < 0 {
            return Err(if privileged {
                MusicError::NegativeVolume
            } else {
                MusicError::VolumeOutOfRange { max }
            });
        }
        if !privileged && percent > i64::from(max) {
            return Err(MusicError::VolumeOutOfRange { max });
        }

        let percent = u32::try_from(percent).unwrap_or(u32::MAX);
        *self.volume.write() = percent as f32 / 100.0;
        info!("🔊 Volumen ajustado a {}% en guild {}", percent, self.guild_id);
        Ok(percent)
    }

    pub fn toggle_filter(&self, kind: AudioFilter, strength: Option<f32>) -> FilterToggle {
        self.filters.toggle(kind, strength)
    }

    pub fn active_filters(&self) -> Vec<MusicFilter> {
        self.filters.snapshot()
    }

    pub fn list_queue(&self, page: usize) -> MusicResult<QueuePage> {
        if self.queue.is_empty() {
            return Err(MusicError::QueueEmpty);
        }
        Ok(self.queue.page(page, self.settings.queue_page_size))
    }

    pub fn remove_at(&self, index: usize) -> MusicResult<TrackItem> {
        self.queue.remove_at(index)
    }

    pub fn shuffle(&self) -> MusicResult<usize> {
        self.queue.shuffle()
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub fn loop_mode(&self) -> LoopMode {
        *self.loop_mode.read()
    }

    /// Sin modo alterna entre `Off` y `Track`.
    pub fn set_loop(&self, mode: Option<LoopMode>) -> LoopMode {
        let mut current = self.loop_mode.write();
        let next = mode.unwrap_or(match *current {
            LoopMode::Off => LoopMode::Track,
            _ => LoopMode::Off,
        });
        *current = next;
        info!("🔁 Loop: {:?} en guild {}", next, self.guild_id);
        next
    }

    pub fn now_playing(&self) -> MusicResult<NowPlaying> {
        let track = self.current.read().clone().ok_or(MusicError::NotPlaying)?;
        let position_secs = self.position.get();
        let percent = if track.duration_secs > 0 {
            position_secs / f64::from(track.duration_secs) * 100.0
        } else {
            0.0
        };

        Ok(NowPlaying {
            track,
            position_secs,
            percent,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::voice::testing::{MemoryTransport, Recorded};
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    /// yt-dlp falso: `--print` devuelve la consulta como título; al
    /// descargar, las URLs con "slow" se quedan colgadas, las de "dead"
    /// fallan y el resto emite 8000 bytes.
    const FAKE_YTDLP: &str = r#"#!/bin/sh
if [ "$1" = "--print" ]; then
  case "$3" in
    *broken*) echo "ERROR: unavailable" >&2; exit 1 ;;
  esac
  printf '%s\n3\nArtist\nhttps://example.com/%s\n' "$3" "$3"
  exit 0
fi
for last; do :; done
case "$last" in
  *slow*) exec sleep 30 ;;
  *dead*) echo "ERROR: [error] Video unavailable" >&2; exit 1 ;;
  *) head -c 8000 /dev/zero ;;
esac
"#;

    const FAKE_FFMPEG: &str = "#!/bin/sh\necho 'size=1kB time=00:00:01.50 bitrate=1' >&2\ncat\n";

    struct Fixture {
        engine: Arc<MusicEngine>,
        recorded: Arc<Recorded>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        };

        let settings = PlayerSettings {
            ytdlp_path: write("yt-dlp", FAKE_YTDLP),
            ffmpeg_path: write("ffmpeg", FAKE_FFMPEG),
            resolve_timeout: Duration::from_secs(5),
            ..PlayerSettings::default()
        };

        let transport = MemoryTransport::default();
        let recorded = transport.recorded.clone();
        let engine = Arc::new(MusicEngine::new(GuildId::new(1), settings, Arc::new(transport)));

        Fixture {
            engine,
            recorded,
            _dir: dir,
        }
    }

    async fn wait_for(what: &str, condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timeout esperando: {what}"));
    }

    fn channel() -> ChannelId {
        ChannelId::new(10)
    }

    #[tokio::test]
    async fn plays_track_and_leaves_when_queue_drains() {
        let f = fixture();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|m| m.starts_with("> Comenzando"))
            .times(1)
            .return_const(());
        notifier
            .expect_notify()
            .withf(|m| m.starts_with("> Reproducción terminada"))
            .times(1)
            .return_const(());
        f.engine.set_notifier(Arc::new(notifier));

        let track = f.engine.play("lofi", channel()).await.unwrap();
        assert_eq!(track.title, "ytsearch:lofi");
        assert_eq!(track.duration_secs, 3);

        wait_for("fin de la cola", || !f.engine.is_active()).await;

        assert_eq!(f.recorded.pcm.lock().len(), 8000);
        assert_eq!(Recorded::count(&f.recorded.joins), 1);
        assert_eq!(Recorded::count(&f.recorded.flushes), 1);
        assert_eq!(Recorded::count(&f.recorded.closes), 1);
        assert_eq!(f.engine.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn resolve_failure_enqueues_nothing() {
        let f = fixture();

        let result = f.engine.play("broken", channel()).await;

        assert!(matches!(result, Err(MusicError::ResolveFailed { .. })));
        assert!(matches!(f.engine.list_queue(1), Err(MusicError::QueueEmpty)));
        assert_eq!(Recorded::count(&f.recorded.joins), 0);
        assert!(!f.engine.is_active());
        assert_eq!(f.engine.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn skip_moves_on_to_next_track() {
        let f = fixture();

        f.engine.play("slow", channel()).await.unwrap();
        wait_for("primera canción", || f.engine.is_playing()).await;

        f.engine.play("fast", channel()).await.unwrap();
        assert_eq!(f.engine.list_queue(1).unwrap().total_items, 1);

        f.engine.skip().unwrap();
        wait_for("fin de la cola", || !f.engine.is_active()).await;

        assert_eq!(f.recorded.pcm.lock().len(), 8000);
        assert_eq!(Recorded::count(&f.recorded.aborts), 1);
        assert_eq!(Recorded::count(&f.recorded.flushes), 1);
        assert_eq!(Recorded::count(&f.recorded.joins), 1);
    }

    #[tokio::test]
    async fn pause_and_resume_guards() {
        let f = fixture();
        assert!(matches!(f.engine.pause(), Err(MusicError::NotPlaying)));
        assert!(matches!(f.engine.resume(), Err(MusicError::NotPlaying)));

        f.engine.play("slow", channel()).await.unwrap();
        wait_for("reproducción", || f.engine.is_playing()).await;

        f.engine.pause().unwrap();
        assert!(matches!(f.engine.pause(), Err(MusicError::AlreadyPaused)));
        assert_eq!(f.engine.state(), PlayerState::Paused);

        f.engine.resume().unwrap();
        assert!(matches!(f.engine.resume(), Err(MusicError::NotPaused)));

        f.engine.stop().await;
        wait_for("parada", || !f.engine.is_active()).await;
        assert!(!f.engine.is_playing());
        assert_eq!(Recorded::count(&f.recorded.closes), 1);
    }

    #[tokio::test]
    async fn leaving_resets_volume_and_filters() {
        let f = fixture();
        assert!(matches!(f.engine.leave_voice().await, Err(MusicError::NoVoiceBinding)));

        f.engine.play("slow", channel()).await.unwrap();
        wait_for("reproducción", || f.engine.is_playing()).await;
        f.engine.set_volume(Some(40), false).unwrap();
        f.engine.toggle_filter(AudioFilter::Nightcore, None);

        f.engine.leave_voice().await.unwrap();
        wait_for("fin", || !f.engine.is_active()).await;

        assert_eq!(f.engine.volume_percent(), 100);
        assert!(f.engine.active_filters().is_empty());
        assert!(matches!(f.engine.now_playing(), Err(MusicError::NotPlaying)));
    }

    #[tokio::test]
    async fn volume_rules() {
        let f = fixture();
        let engine = &f.engine;

        assert_eq!(engine.set_volume(None, false).unwrap(), 100);
        assert!(matches!(
            engine.set_volume(Some(150), false),
            Err(MusicError::VolumeOutOfRange { max: 100 })
        ));
        assert!(matches!(
            engine.set_volume(Some(-5), false),
            Err(MusicError::VolumeOutOfRange { .. })
        ));
        assert!(matches!(engine.set_volume(Some(-5), true), Err(MusicError::NegativeVolume)));

        assert_eq!(engine.set_volume(Some(150), true).unwrap(), 150);
        assert_eq!(engine.set_volume(None, false).unwrap(), 150);
        assert_eq!(engine.set_volume(Some(50), false).unwrap(), 50);
    }

    #[tokio::test]
    async fn loop_without_mode_toggles_track() {
        let f = fixture();
        assert_eq!(f.engine.set_loop(None), LoopMode::Track);
        assert_eq!(f.engine.set_loop(None), LoopMode::Off);
        assert_eq!(f.engine.set_loop(Some(LoopMode::Queue)), LoopMode::Queue);
        assert_eq!(f.engine.set_loop(None), LoopMode::Off);
    }

    #[tokio::test]
    async fn now_playing_reports_position() {
        let f = fixture();
        f.engine.play("slow", channel()).await.unwrap();
        wait_for("reproducción", || f.engine.is_playing()).await;
        wait_for("posición", || f.engine.position.get() > 0.0).await;

        let now = f.engine.now_playing().unwrap();
        assert_eq!(now.track.title, "ytsearch:slow");
        assert_eq!(now.position_secs, 1.5);
        assert_eq!(now.percent, 50.0);

        f.engine.stop().await;
    }

    async fn skip_after_loop_change(initial: LoopMode) {
        let f = fixture();
        f.engine.set_loop(Some(initial));

        f.engine.play("slow", channel()).await.unwrap();
        wait_for("reproducción", || f.engine.is_playing()).await;
        assert_eq!(f.engine.voice_channel().await, Some(channel()));

        f.engine.set_loop(Some(LoopMode::Off));
        f.engine.skip().unwrap();
        wait_for("fin de la cola", || !f.engine.is_active()).await;

        // Una sola salida: la canción saltada no vuelve a sonar
        assert_eq!(Recorded::count(&f.recorded.streams), 1);
        assert!(matches!(f.engine.list_queue(1), Err(MusicError::QueueEmpty)));
        assert_eq!(f.engine.voice_channel().await, None);
    }

    #[tokio::test]
    async fn skipping_after_track_loop_is_disabled_does_not_replay() {
        skip_after_loop_change(LoopMode::Track).await;
    }

    #[tokio::test]
    async fn skipping_after_queue_loop_is_disabled_does_not_replay() {
        skip_after_loop_change(LoopMode::Queue).await;
    }

    #[tokio::test]
    async fn failing_download_under_track_loop_is_dropped() {
        let f = fixture();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|m| m.starts_with("> Comenzando"))
            .times(1)
            .return_const(());
        notifier
            .expect_notify()
            .withf(|m| m.starts_with("❌ Error reproduciendo"))
            .times(1)
            .return_const(());
        f.engine.set_notifier(Arc::new(notifier));
        f.engine.set_loop(Some(LoopMode::Track));

        f.engine.play("dead", channel()).await.unwrap();
        wait_for("fin de la cola", || !f.engine.is_active()).await;

        assert!(f.recorded.pcm.lock().is_empty());
        assert_eq!(Recorded::count(&f.recorded.streams), 1);
        assert_eq!(Recorded::count(&f.recorded.aborts), 1);
        assert!(matches!(f.engine.list_queue(1), Err(MusicError::QueueEmpty)));
    }

    #[tokio::test]
    async fn late_notice_of_own_close_keeps_new_session() {
        let f = fixture();

        f.engine.play("lofi", channel()).await.unwrap();
        wait_for("fin de la cola", || !f.engine.is_active()).await;
        assert_eq!(Recorded::count(&f.recorded.closes), 1);

        // Se vuelve a unir antes de que llegue el aviso del cierre anterior
        f.engine.play("slow", channel()).await.unwrap();
        wait_for("reproducción", || f.engine.is_playing()).await;

        assert!(!f.engine.handle_voice_disconnect(Some(channel())).await);
        assert!(f.engine.is_playing());
        assert_eq!(f.engine.voice_channel().await, Some(channel()));

        // Una expulsión real sí detiene el motor
        assert!(f.engine.handle_voice_disconnect(Some(channel())).await);
        wait_for("parada", || !f.engine.is_active()).await;
        assert_eq!(f.engine.voice_channel().await, None);
    }

    #[tokio::test]
    async fn disconnect_from_other_channel_is_ignored() {
        let f = fixture();

        f.engine.play("slow", channel()).await.unwrap();
        wait_for("reproducción", || f.engine.is_playing()).await;

        assert!(!f.engine.handle_voice_disconnect(Some(ChannelId::new(99))).await);
        assert!(f.engine.is_playing());

        f.engine.stop().await;
        wait_for("parada", || !f.engine.is_active()).await;
    }

    #[test]
    fn disconnect_needs_a_bound_channel() {
        assert!(!disconnect_applies(Some(ChannelId::new(1)), None));
        assert!(!disconnect_applies(Some(ChannelId::new(1)), Some(ChannelId::new(2))));
        assert!(disconnect_applies(Some(ChannelId::new(1)), Some(ChannelId::new(1))));
        assert!(disconnect_applies(None, Some(ChannelId::new(1))));
    }
}
