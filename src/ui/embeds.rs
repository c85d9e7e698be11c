use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    engine::NowPlaying,
    filters::MusicFilter,
    queue::{LoopMode, QueuePage, TrackItem},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Music";

/// `[título](url)`; los archivos locales sólo muestran el título.
pub fn track_link(track: &TrackItem) -> String {
    if track.is_local_file {
        format!("**{}**", track.title)
    } else {
        format!("[{}]({})", track.title, track.source_ref)
    }
}

/// `posición s / duración s | porcentaje%`
pub fn progress_line(now: &NowPlaying) -> String {
    format!(
        "{:.0}s / {}s | {:.0}%",
        now.position_secs, now.track.duration_secs, now.percent
    )
}

/// Un filtro por línea como `Nombre:intensidad`, o `-` si no hay ninguno.
pub fn filter_lines(filters: &[MusicFilter]) -> String {
    if filters.is_empty() {
        return "-".to_string();
    }

    filters
        .iter()
        .map(|filter| format!("{}:{}", filter.name, filter.strength))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Líneas numeradas de una página de la cola.
pub fn queue_lines(page: &QueuePage, items_per_page: usize) -> String {
    let offset = (page.current_page - 1) * items_per_page;

    page.items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let duration = if item.duration_secs > 0 {
                format!(" `[{}]`", format_duration(Duration::from_secs(item.duration_secs.into())))
            } else {
                String::new()
            };
            format!("**{}**. {}{}", offset + i + 1, track_link(item), duration)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(now: &NowPlaying) -> CreateEmbed {
    let duration = if now.track.duration_secs > 0 {
        format_duration(Duration::from_secs(now.track.duration_secs.into()))
    } else {
        "🔴 En vivo / desconocida".to_string()
    };

    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(track_link(&now.track))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", &now.track.author, true)
        .field("⏱️ Duración", duration, true)
        .field("📍 Progreso", progress_line(now), false)
        .field("📊", progress_bar(now.percent), false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed para una canción agregada a la cola
pub fn create_track_added_embed(track: &TrackItem) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Agregado a la cola")
        .description(track_link(track))
        .color(colors::MUSIC_PURPLE)
        .field("🎤 Artista", &track.author, true);

    if track.duration_secs > 0 {
        embed = embed.field(
            "⏱️ Duración",
            format_duration(Duration::from_secs(track.duration_secs.into())),
            true,
        );
    }

    embed
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(page: &QueuePage, items_per_page: usize, loop_mode: LoopMode) -> CreateEmbed {
    let status = match loop_mode {
        LoopMode::Track => "🔂 Repitiendo canción",
        LoopMode::Queue => "🔁 Repitiendo cola",
        LoopMode::Off => "▶️ Sin repetición",
    };

    CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .description(queue_lines(page, items_per_page))
        .field(
            "Información",
            format!("**Total:** {} canciones • {}", page.total_items, status),
            false,
        )
        .footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Guild Music",
            page.current_page, page.total_pages
        )))
        .timestamp(Timestamp::now())
}

/// Crea un embed con los filtros activos
pub fn create_filters_embed(filters: &[MusicFilter]) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎛️ Filtros")
        .description(format!("```\n{}\n```", filter_lines(filters)))
        .color(if filters.is_empty() {
            colors::NEUTRAL_GRAY
        } else {
            colors::MUSIC_PURPLE
        })
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de volumen con indicador visual
pub fn create_volume_embed(percent: u32, changed: bool) -> CreateEmbed {
    let status_emoji = match percent {
        0 => "🔈",
        1..=50 => "🔉",
        _ => "🔊",
    };
    let description = if changed {
        format!("**Nuevo volumen: {}%**", percent)
    } else {
        format!("**Volumen actual: {}%**", percent)
    };

    CreateEmbed::default()
        .title(format!("{} Control de Volumen", status_emoji))
        .description(description)
        .field("📊 Nivel", volume_bar(percent), false)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("💡 Los cambios se aplican desde la siguiente canción"))
        .timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de aviso
pub fn create_warning_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚠️ {}", title))
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Barra de 20 segmentos; por encima de 100% se muestra llena.
fn volume_bar(percent: u32) -> String {
    let segments = 20;
    let filled = (percent.min(100) as usize * segments) / 100;
    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(segments - filled))
}

fn progress_bar(percent: f64) -> String {
    let segments = 20;
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * segments as f64) as usize;
    format!("`[{}{}]`", "▬".repeat(filled), "─".repeat(segments - filled))
}

/// Formatea una duración en formato legible
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
