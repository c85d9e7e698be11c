use std::{path::Path, process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, error, info};
use url::Url;

use super::queue::TrackItem;
use crate::{
    config::PlayerSettings,
    error::{MusicError, MusicResult},
};

/// Prefijo de búsqueda para consultas que no son URLs.
pub const SEARCH_PREFIX: &str = "ytsearch:";

/// Campos pedidos a yt-dlp, uno por línea.
const PRINT_FIELDS: &str = "title,duration,uploader,webpage_url";

/// `true` sólo para URLs absolutas http(s).
pub fn is_valid_url(input: &str) -> bool {
    Url::parse(input)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Entrada final para yt-dlp: la URL tal cual o la consulta con [`SEARCH_PREFIX`].
pub fn indexer_input(query: &str) -> String {
    if is_valid_url(query) {
        query.to_string()
    } else {
        format!("{}{}", SEARCH_PREFIX, query)
    }
}

/// Interpreta las cuatro líneas de `--print`: título, duración, autor y URL.
///
/// Una duración no numérica (directos, por ejemplo) se toma como 0.
pub fn parse_indexer_output(query: &str, output: &str) -> MusicResult<TrackItem> {
    let lines: Vec<&str> = output
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .collect();

    let [title, duration, author, url, ..] = lines.as_slice() else {
        return Err(MusicError::resolve_failed(
            query,
            format!("salida incompleta de yt-dlp ({} líneas)", lines.len()),
        ));
    };

    let duration_secs = duration.trim().parse::<u32>().unwrap_or(0);

    Ok(TrackItem::remote(*url, *title, *author, duration_secs))
}

/// Obtiene los metadatos de una canción mediante yt-dlp.
#[derive(Debug, Clone)]
pub struct TrackResolver {
    ytdlp_path: String,
    timeout: Duration,
}

impl TrackResolver {
    pub fn new(settings: &PlayerSettings) -> Self {
        Self {
            ytdlp_path: settings.ytdlp_path.clone(),
            timeout: settings.resolve_timeout,
        }
    }

    /// Resuelve una URL o búsqueda libre. Si yt-dlp no termina dentro del
    /// timeout el proceso se mata y se devuelve [`MusicError::ResolveFailed`].
    pub async fn resolve(&self, query: &str) -> MusicResult<TrackItem> {
        let input = indexer_input(query);
        if input != query {
            debug!("🔍 '{}' no es una URL, buscando con {}", query, SEARCH_PREFIX);
        }

        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.args(["--print", PRINT_FIELDS])
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("❌ No se pudo ejecutar yt-dlp: {}", e);
                return Err(MusicError::resolve_failed(query, e.to_string()));
            }
            Err(_) => {
                error!("⏱️ Timeout obteniendo información de '{}'", query);
                return Err(MusicError::resolve_failed(
                    query,
                    format!("timeout tras {}s", self.timeout.as_secs_f32()),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("❌ yt-dlp falló ({}): {}", output.status, stderr.trim());
            return Err(MusicError::resolve_failed(query, stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("yt-dlp --print: '{}'", stdout.trim());

        let track = parse_indexer_output(query, &stdout)?;
        info!("✅ Resuelto: {} ({}s)", track.title, track.duration_secs);
        Ok(track)
    }
}

/// Valida una ruta local para `playfile`. Las URIs absolutas se rechazan.
pub async fn resolve_local_file(input: &str) -> MusicResult<TrackItem> {
    if Url::parse(input).is_ok() {
        return Err(MusicError::InvalidTrack(format!("'{}' no es un archivo local", input)));
    }

    let path = Path::new(input);
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(TrackItem::local(path)),
        Ok(_) => Err(MusicError::InvalidTrack(format!("'{}' no es un archivo", input))),
        Err(_) => Err(MusicError::InvalidTrack(format!("'{}' no existe", input))),
    }
}
