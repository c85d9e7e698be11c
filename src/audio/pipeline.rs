//! Reproducción de una canción: yt-dlp → relay → FFmpeg → voz.
//!
//! Los procesos de una canción quedan registrados en un [`ProcessSet`] para
//! que el motor pueda matarlos de forma síncrona desde `skip`/`stop`; todas
//! las tareas comparten el mismo [`CancellationToken`].

use parking_lot::Mutex;
use std::{
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    args::{build_fetch_args, build_transcode_args, PIPE_IN, PIPE_OUT},
    filters::MusicFilter,
    process_log::{read_error_stream, PlaybackPosition, StderrReport},
    queue::TrackItem,
    relay::{relay, PauseFlag, RelayStats},
    voice::PcmSink,
};
use crate::{
    config::PlayerSettings,
    error::{MusicError, MusicResult},
};

pub const FETCH_PROCESS: &str = "yt-dlp";
pub const TRANSCODE_PROCESS: &str = "ffmpeg";

/// Lectura de la salida de FFmpeg: 20ms de PCM estéreo s16le a 48kHz.
const PCM_READ_SIZE: usize = 3840;
/// Tiempo que se espera a que un proceso salga por sí solo tras el EOF.
const EXIT_GRACE: Duration = Duration::from_secs(5);
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Procesos vivos de la canción actual.
#[derive(Debug, Default)]
pub struct ProcessSet {
    children: Mutex<Vec<(&'static str, Child)>>,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, name: &'static str, child: Child) {
        self.children.lock().push((name, child));
    }

    /// `true` si algún proceso sigue en ejecución.
    pub fn any_running(&self) -> bool {
        self.children
            .lock()
            .iter_mut()
            .any(|(_, child)| matches!(child.try_wait(), Ok(None)))
    }

    /// Mata todos los procesos sin esperar. Idempotente.
    pub fn kill_all(&self) {
        let children: Vec<_> = self.children.lock().drain(..).collect();
        for (name, mut child) in children {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.start_kill() {
                    warn!("⚠️ No se pudo matar {}: {}", name, e);
                } else {
                    debug!("🔪 {} terminado", name);
                }
            }
        }
    }

    /// Espera a que los procesos salgan tras el EOF; los que no lo hagan a
    /// tiempo se matan. Devuelve el primer proceso que terminó con error.
    async fn reap(&self) -> Option<(&'static str, ExitStatus)> {
        let children: Vec<_> = self.children.lock().drain(..).collect();
        let mut failed = None;
        for (name, mut child) in children {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) if status.success() => debug!("{} terminó correctamente", name),
                Ok(Ok(status)) => {
                    warn!("⚠️ {} terminó con {}", name, status);
                    failed = failed.or(Some((name, status)));
                }
                Ok(Err(e)) => warn!("⚠️ Error esperando a {}: {}", name, e),
                Err(_) => {
                    warn!("⏱️ {} no terminó a tiempo, forzando cierre", name);
                    let _ = child.start_kill();
                }
            }
        }
        failed
    }
}

/// Estado compartido entre el motor y el pipeline de una canción.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub pause: PauseFlag,
    pub position: Arc<PlaybackPosition>,
    pub processes: Arc<ProcessSet>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub relay: RelayStats,
    pub pcm_bytes: u64,
    /// Líneas `[error]` vistas en stderr; no abortan la canción.
    pub upstream_errors: usize,
}

/// Reproduce `track` completa en `sink`.
///
/// Si algo falla, o la canción se cancela, el flujo de voz se aborta y los
/// procesos se matan antes de devolver el error.
pub async fn stream_track(
    settings: &PlayerSettings,
    track: &TrackItem,
    volume: f32,
    filters: &[MusicFilter],
    sink: &mut dyn PcmSink,
    ctx: &PipelineContext,
) -> MusicResult<PipelineReport> {
    let result = run(settings, track, volume, filters, sink, ctx).await;

    if result.is_err() {
        sink.abort();
        ctx.processes.kill_all();
    }

    result
}

async fn run(
    settings: &PlayerSettings,
    track: &TrackItem,
    volume: f32,
    filters: &[MusicFilter],
    sink: &mut dyn PcmSink,
    ctx: &PipelineContext,
) -> MusicResult<PipelineReport> {
    // Los lectores de stderr mueren con la canción
    let scope = ctx.cancel.child_token();
    let mut stderr_tasks: Vec<JoinHandle<StderrReport>> = Vec::with_capacity(2);

    let source: Box<dyn AsyncRead + Unpin + Send> = if track.is_local_file {
        debug!("📁 Reproduciendo archivo local {}", track.source_ref);
        Box::new(tokio::fs::File::open(&track.source_ref).await?)
    } else {
        let args = build_fetch_args(track, settings.download_playlist, settings.random_playlist);
        debug!("yt-dlp args: {}", args.join(" "));

        let mut fetch = Command::new(&settings.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MusicError::ProcessSpawnFailed {
                process: FETCH_PROCESS,
                source,
            })?;

        let stdout = take_pipe(fetch.stdout.take(), FETCH_PROCESS, "stdout")?;
        if let Some(stderr) = fetch.stderr.take() {
            stderr_tasks.push(tokio::spawn(read_error_stream(
                stderr,
                FETCH_PROCESS,
                None,
                scope.clone(),
            )));
        }
        ctx.processes.register(FETCH_PROCESS, fetch);
        Box::new(stdout)
    };

    let args = build_transcode_args(Some(PIPE_IN), Some(PIPE_OUT), volume, filters, settings.debug_mode);
    debug!("ffmpeg args: {}", args.join(" "));

    let mut transcode = Command::new(&settings.ffmpeg_path)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MusicError::ProcessSpawnFailed {
            process: TRANSCODE_PROCESS,
            source,
        })?;

    let stdin = take_pipe(transcode.stdin.take(), TRANSCODE_PROCESS, "stdin")?;
    let stdout = take_pipe(transcode.stdout.take(), TRANSCODE_PROCESS, "stdout")?;
    if let Some(stderr) = transcode.stderr.take() {
        stderr_tasks.push(tokio::spawn(read_error_stream(
            stderr,
            TRANSCODE_PROCESS,
            Some(ctx.position.clone()),
            scope.clone(),
        )));
    }
    ctx.processes.register(TRANSCODE_PROCESS, transcode);

    let (relay_stats, pcm_bytes) = tokio::try_join!(
        feed_transcoder(source, stdin, &ctx.pause, &ctx.cancel),
        pump_output(stdout, &mut *sink, &ctx.cancel),
    )?;

    tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(MusicError::StreamCancelled),
        flushed = sink.flush() => flushed?,
    }

    let failed = ctx.processes.reap().await;

    let mut upstream_errors = Vec::new();
    for mut task in stderr_tasks {
        let report = match tokio::time::timeout(STDERR_DRAIN, &mut task).await {
            Ok(report) => report,
            Err(_) => {
                scope.cancel();
                task.await
            }
        };
        if let Ok(report) = report {
            upstream_errors.extend(report.errors);
        }
    }
    scope.cancel();

    if let Some((process, status)) = failed {
        // Se prefiere la línea `[error]` del propio proceso al código de salida
        let reported = upstream_errors.into_iter().find(|e| {
            matches!(e, MusicError::UpstreamProcessError { process: p, .. } if *p == process)
        });
        return Err(reported.unwrap_or_else(|| MusicError::UpstreamProcessError {
            process,
            line: format!("terminó con {}", status),
        }));
    }

    if !track.is_local_file && relay_stats.bytes_read == 0 {
        return Err(MusicError::UpstreamProcessError {
            process: FETCH_PROCESS,
            line: "no se recibió audio".to_string(),
        });
    }

    info!(
        "📊 Canción completa: {} bytes leídos, {} bytes PCM, {} chunks con ritmo, {} errores upstream",
        relay_stats.bytes_read,
        pcm_bytes,
        relay_stats.paced_chunks,
        upstream_errors.len()
    );

    Ok(PipelineReport {
        upstream_errors: upstream_errors.len(),
        relay: relay_stats,
        pcm_bytes,
    })
}

fn take_pipe<T>(pipe: Option<T>, process: &'static str, name: &str) -> MusicResult<T> {
    pipe.ok_or_else(|| {
        MusicError::Io(std::io::Error::other(format!("{} sin {}", process, name)))
    })
}

/// Relay hacia stdin de FFmpeg; al terminar cierra stdin para que FFmpeg
/// vacíe su salida y salga.
async fn feed_transcoder(
    mut source: Box<dyn AsyncRead + Unpin + Send>,
    mut stdin: ChildStdin,
    pause: &PauseFlag,
    cancel: &CancellationToken,
) -> MusicResult<RelayStats> {
    let stats = relay(&mut source, &mut stdin, pause, cancel).await?;
    stdin.shutdown().await?;
    drop(stdin);

    debug!("📤 Relay terminado: {} bytes", stats.bytes_written);
    Ok(stats)
}

/// Copia la salida PCM de FFmpeg al flujo de voz hasta EOF.
async fn pump_output<R>(mut stdout: R, sink: &mut dyn PcmSink, cancel: &CancellationToken) -> MusicResult<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; PCM_READ_SIZE];
    let mut total = 0u64;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Err(MusicError::StreamCancelled),
            read = stdout.read(&mut buffer) => read?,
        };

        if read == 0 {
            return Ok(total);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(MusicError::StreamCancelled),
            written = sink.write(&buffer[..read]) => written?,
        }
        total += read as u64;
    }
}
