use anyhow::Result;
use serenity::{
    all::MessageFlags,
    async_trait,
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
        EditInteractionResponse,
    },
    http::Http,
    model::{
        application::{CommandDataOptionValue, CommandInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{
        engine::{MusicEngine, Notifier},
        filters::{AudioFilter, FilterToggle},
        queue::LoopMode,
    },
    bot::GuildMusicBot,
    error::{MusicError, MusicResult},
    ui::embeds,
};

/// Anuncia los cambios de canción en el canal de texto del último comando.
pub struct TextChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl TextChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Notifier for TextChannelNotifier {
    async fn notify(&self, message: String) {
        let message = CreateMessage::new()
            .content(message)
            .flags(MessageFlags::SUPPRESS_EMBEDS);

        if let Err(e) = self.channel_id.send_message(&self.http, message).await {
            warn!("⚠️ No se pudo enviar aviso al canal {}: {}", self.channel_id, e);
        }
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &GuildMusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let engine = bot.engine(guild_id);
    engine.set_notifier(Arc::new(TextChannelNotifier::new(ctx.http.clone(), command.channel_id)));

    let privileged = bot.config.is_privileged(command.user.id.get());

    let reply = match command.data.name.as_str() {
        "play" | "playfile" => return handle_play(ctx, &command, &engine, privileged).await,
        "stop" => {
            engine.stop().await;
            Ok(embeds::create_success_embed("Detenido", "Reproducción detenida y cola limpiada"))
        }
        "skip" => engine
            .skip()
            .map(|()| embeds::create_success_embed("Saltada", "⏭️ Pasando a la siguiente canción")),
        "pause" => engine
            .pause()
            .map(|()| embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada")),
        "resume" => engine
            .resume()
            .map(|()| embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada")),
        "volume" => {
            let level = int_option(&command, "level");
            engine
                .set_volume(level, privileged)
                .map(|percent| embeds::create_volume_embed(percent, level.is_some()))
        }
        "filter" => Ok(handle_filter(&command, &engine)),
        "clear" => {
            let removed = engine.clear_queue();
            Ok(embeds::create_success_embed(
                "Cola limpiada",
                &format!("🗑️ {} canciones eliminadas", removed),
            ))
        }
        "queue" => {
            let page = int_option(&command, "page").map_or(1, |page| page.max(1) as usize);
            engine.list_queue(page).map(|listing| {
                embeds::create_queue_embed(&listing, bot.config.queue_page_size, engine.loop_mode())
            })
        }
        "loop" => {
            let mode = str_option(&command, "mode").and_then(LoopMode::from_id);
            let mode = engine.set_loop(mode);
            Ok(embeds::create_success_embed("Repetición", loop_description(mode)))
        }
        "shuffle" => engine.shuffle().map(|count| {
            embeds::create_success_embed("Cola mezclada", &format!("🔀 {} canciones mezcladas", count))
        }),
        "remove" => {
            let index = int_option(&command, "index").map_or(0, |index| index.max(0) as usize);
            engine.remove_at(index).map(|track| {
                embeds::create_success_embed("Eliminada", &format!("🗑️ {}", embeds::track_link(&track)))
            })
        }
        "now_playing" => engine
            .now_playing()
            .map(|now| embeds::create_now_playing_embed(&now)),
        "leave" => engine
            .leave_voice()
            .await
            .map(|()| embeds::create_success_embed("Desconectado", "👋 Salí del canal de voz")),
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
            return Ok(());
        }
    };

    let (embed, ephemeral) = match reply {
        Ok(embed) => (embed, false),
        Err(e) => (error_embed(&e), true),
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

/// `play` y `playfile`: pueden tardar, así que se difiere la respuesta.
async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    engine: &Arc<MusicEngine>,
    privileged: bool,
) -> Result<()> {
    let is_file = command.data.name == "playfile";

    let user_channel = get_user_voice_channel(ctx, engine.guild_id(), command.user.id);
    let channel_id = match play_target(is_file, privileged, user_channel) {
        Ok(channel_id) => channel_id,
        Err(e) => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .embed(error_embed(&e))
                            .ephemeral(true),
                    ),
                )
                .await?;
            return Ok(());
        }
    };

    let input = str_option(command, if is_file { "path" } else { "query" })
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let result = if is_file {
        engine.play_file(&input, channel_id).await
    } else {
        engine.play(&input, channel_id).await
    };

    let embed = match result {
        Ok(track) => embeds::create_track_added_embed(&track),
        Err(e) => error_embed(&e),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

/// Canal al que unirse para `play`/`playfile`.
fn play_target(is_file: bool, privileged: bool, user_channel: Option<ChannelId>) -> MusicResult<ChannelId> {
    if is_file && !privileged {
        return Err(MusicError::NotPrivileged("reproducir archivos locales"));
    }
    user_channel.ok_or(MusicError::NoVoiceBinding)
}

/// Sin nombre lista los filtros activos; con nombre lo alterna.
fn handle_filter(command: &CommandInteraction, engine: &MusicEngine) -> CreateEmbed {
    let Some(name) = str_option(command, "name") else {
        return embeds::create_filters_embed(&engine.active_filters());
    };

    let Some(kind) = AudioFilter::from_id(name) else {
        return embeds::create_warning_embed("Filtro desconocido", name);
    };

    let strength = float_option(command, "strength").map(|s| s as f32);
    let description = match engine.toggle_filter(kind, strength) {
        FilterToggle::Enabled => format!("🎛️ Filtro **{}** activado", kind.id()),
        FilterToggle::Disabled => format!("🎛️ Filtro **{}** desactivado", kind.id()),
    };

    embeds::create_success_embed(
        "Filtros",
        &format!(
            "{}\n```\n{}\n```\n💡 Se aplica desde la siguiente canción",
            description,
            embeds::filter_lines(&engine.active_filters())
        ),
    )
}

fn loop_description(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Off => "▶️ Repetición desactivada",
        LoopMode::Track => "🔂 Repitiendo la canción actual",
        LoopMode::Queue => "🔁 Repitiendo la cola",
    }
}

/// Título del embed de error según el rechazo.
fn error_title(error: &MusicError) -> &'static str {
    match error {
        MusicError::ResolveFailed { .. } => "No se encontró la canción",
        MusicError::InvalidTrack(_) => "Archivo no válido",
        MusicError::NotPlaying => "Nada en reproducción",
        MusicError::NoVoiceBinding | MusicError::Voice(_) => "Canal de voz",
        MusicError::NotPrivileged(_) => "No permitido",
        MusicError::AlreadyPaused | MusicError::NotPaused => "Estado de pausa",
        MusicError::QueueEmpty | MusicError::InvalidIndex { .. } => "Cola",
        MusicError::VolumeOutOfRange { .. } | MusicError::NegativeVolume => "Volumen",
        _ => "Error",
    }
}

fn error_embed(error: &MusicError) -> CreateEmbed {
    embeds::create_error_embed(error_title(error), &capitalize(&error.to_string()))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a CommandDataOptionValue> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .map(|opt| &opt.value)
}

fn str_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    option(command, name).and_then(|value| value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    option(command, name).and_then(|value| value.as_i64())
}

fn float_option(command: &CommandInteraction, name: &str) -> Option<f64> {
    option(command, name).and_then(|value| value.as_f64())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
