//! Argumentos de línea de comandos para yt-dlp y FFmpeg.
//!
//! Funciones puras: mismos parámetros, mismos argumentos.

use super::{filters::MusicFilter, queue::TrackItem};

/// FFmpeg lee de stdin / escribe en stdout.
pub const PIPE_IN: &str = "pipe:0";
pub const PIPE_OUT: &str = "pipe:1";

pub const OUTPUT_CHANNELS: u32 = 2;
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Argumentos del transcoder: PCM s16le estéreo a 48kHz con la cadena
/// `volume=<v>[,<filtro>]...` en el orden de los filtros activos.
pub fn build_transcode_args(
    input: Option<&str>,
    output: Option<&str>,
    volume: f32,
    filters: &[MusicFilter],
    debug: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        if debug { "debug".into() } else { "error".into() },
        // Progreso (time=...) en stderr aunque el nivel de log sea bajo
        "-stats".into(),
    ];

    if let Some(input) = input {
        args.push("-i".into());
        args.push(input.into());
    }

    args.push("-ac".into());
    args.push(OUTPUT_CHANNELS.to_string());
    args.push("-ar".into());
    args.push(OUTPUT_SAMPLE_RATE.to_string());
    args.push("-f".into());
    args.push("s16le".into());

    args.push("-filter:a".into());
    args.push(filter_expression(volume, filters));

    if let Some(output) = output {
        args.push(output.into());
    }

    args
}

/// `volume=<v>` seguido de cada filtro activo separado por comas.
pub fn filter_expression(volume: f32, filters: &[MusicFilter]) -> String {
    let mut expression = format!("volume={}", volume);
    for filter in filters {
        expression.push(',');
        expression.push_str(&filter.expression);
    }
    expression
}

/// Argumentos de descarga: mejor audio disponible, sólo audio, sin barra de
/// progreso, a stdout.
pub fn build_fetch_args(track: &TrackItem, allow_playlist: bool, randomize_playlist: bool) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(12);

    args.push(if allow_playlist { "--yes-playlist" } else { "--no-playlist" }.into());
    if allow_playlist && randomize_playlist {
        args.push("--playlist-random".into());
    }

    args.extend(
        ["-o", "-", "-q", "--verbose", "--no-progress", "-f", "bestaudio/best", "-x"]
            .into_iter()
            .map(String::from),
    );

    args.push(track.source_ref.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::filters::AudioFilter;
    use pretty_assertions::assert_eq;

    fn track() -> TrackItem {
        TrackItem::remote("https://www.youtube.com/watch?v=abc", "Song", "Uploader", 120)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn transcode_args_fix_output_format() {
        let args = build_transcode_args(Some(PIPE_IN), Some(PIPE_OUT), 1.0, &[], false);

        assert_eq!(value_after(&args, "-i"), Some("pipe:0"));
        assert_eq!(value_after(&args, "-ac"), Some("2"));
        assert_eq!(value_after(&args, "-ar"), Some("48000"));
        assert_eq!(value_after(&args, "-f"), Some("s16le"));
        assert_eq!(value_after(&args, "-filter:a"), Some("volume=1"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn transcode_log_level_follows_debug_flag() {
        let quiet = build_transcode_args(None, None, 1.0, &[], false);
        let verbose = build_transcode_args(None, None, 1.0, &[], true);

        assert_eq!(value_after(&quiet, "-loglevel"), Some("error"));
        assert_eq!(value_after(&verbose, "-loglevel"), Some("debug"));
        assert!(!quiet.contains(&"-i".to_string()));
    }

    #[test]
    fn volume_is_followed_by_scaled_bass() {
        let filters = vec![AudioFilter::BassBoost.descriptor(Some(2.0))];
        let args = build_transcode_args(Some(PIPE_IN), Some(PIPE_OUT), 0.5, &filters, false);

        assert_eq!(
            value_after(&args, "-filter:a"),
            Some("volume=0.5,bass=g=20:f=100:w=0.3")
        );
    }

    #[test]
    fn filters_render_in_given_order() {
        let filters = vec![
            AudioFilter::Flanger.descriptor(None),
            AudioFilter::Tempo.descriptor(Some(1.5)),
        ];
        assert_eq!(filter_expression(0.8, &filters), "volume=0.8,flanger,atempo=1.5");
    }

    #[test]
    fn fetch_args_with_playlist() {
        let args = build_fetch_args(&track(), true, true);

        assert_eq!(args[0], "--yes-playlist");
        assert_eq!(args[1], "--playlist-random");
        assert_eq!(value_after(&args, "-o"), Some("-"));
        assert_eq!(value_after(&args, "-f"), Some("bestaudio/best"));
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"--no-progress".to_string()));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn fetch_args_without_playlist_never_randomize() {
        let args = build_fetch_args(&track(), false, true);

        assert_eq!(args[0], "--no-playlist");
        assert!(!args.contains(&"--playlist-random".to_string()));
    }

    #[test]
    fn builders_are_deterministic() {
        let filters = vec![AudioFilter::Chorus.descriptor(Some(0.5))];
        assert_eq!(
            build_transcode_args(Some(PIPE_IN), Some(PIPE_OUT), 0.3, &filters, true),
            build_transcode_args(Some(PIPE_IN), Some(PIPE_OUT), 0.3, &filters, true)
        );
        assert_eq!(build_fetch_args(&track(), true, false), build_fetch_args(&track(), true, false));
    }
}
