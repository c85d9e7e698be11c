//! Errores del motor de reproducción.
//!
//! Los fallos de una sola canción (resolución, procesos externos, cancelación)
//! se capturan en el bucle de reproducción y nunca lo detienen. El resto de
//! variantes representan rechazos de comandos que el bot traduce a mensajes.

use serenity::model::id::GuildId;

use crate::audio::registry::EngineKind;

#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    /// yt-dlp no respondió a tiempo, terminó con error o su salida no es válida.
    #[error("no se pudo obtener información de '{query}': {reason}")]
    ResolveFailed { query: String, reason: String },

    #[error("no hay ningún canal de voz vinculado")]
    NoVoiceBinding,

    #[error("la cola está vacía")]
    QueueEmpty,

    #[error("no se pudo iniciar {process}: {source}")]
    ProcessSpawnFailed {
        process: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Esperado en skip/stop; se registra en debug y no se muestra al usuario.
    #[error("reproducción cancelada")]
    StreamCancelled,

    #[error("{process} reportó un error: {line}")]
    UpstreamProcessError { process: &'static str, line: String },

    #[error("no hay ninguna canción reproduciéndose")]
    NotPlaying,

    #[error("la reproducción ya está pausada")]
    AlreadyPaused,

    #[error("la reproducción no está pausada")]
    NotPaused,

    #[error("no existe el elemento {index} (la cola tiene {len})")]
    InvalidIndex { index: usize, len: usize },

    #[error("el volumen debe estar entre 0% y {max}%")]
    VolumeOutOfRange { max: u32 },

    #[error("el volumen no puede ser menor que 0%")]
    NegativeVolume,

    #[error("pista inválida: {0}")]
    InvalidTrack(String),

    #[error("sólo el autor del bot puede {0}")]
    NotPrivileged(&'static str),

    #[error("ya existe un motor {kind:?} para la guild {guild_id}")]
    DuplicateEngine { guild_id: GuildId, kind: EngineKind },

    #[error("error de voz: {0}")]
    Voice(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MusicError {
    pub fn resolve_failed(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResolveFailed {
            query: query.into(),
            reason: reason.into(),
        }
    }

    /// Cancelaciones esperadas que no deben mostrarse como errores.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::StreamCancelled)
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;
