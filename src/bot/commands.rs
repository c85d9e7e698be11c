use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::audio::{filters::AudioFilter, queue::LoopMode};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        playfile_command(),
        stop_command(),
        skip_command(),
        pause_command(),
        resume_command(),
        volume_command(),
        filter_command(),
        clear_command(),
        queue_command(),
        loop_command(),
        shuffle_command(),
        remove_command(),
        now_playing_command(),
        leave_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o la agrega a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn playfile_command() -> CreateCommand {
    CreateCommand::new("playfile")
        .description("Reproduce un archivo local del servidor")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "path", "Ruta del archivo")
                .required(true),
        )
}

// Comandos de control

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción, limpia la cola y sale del canal")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

// Comandos de audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Muestra o ajusta el volumen (se aplica desde la siguiente canción)")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Integer,
            "level",
            "Volumen en porcentaje",
        ))
}

fn filter_command() -> CreateCommand {
    let mut filter = CreateCommandOption::new(CommandOptionType::String, "name", "Filtro a activar o desactivar");
    for kind in AudioFilter::ALL {
        filter = filter.add_string_choice(kind.descriptor(None).name, kind.id());
    }

    CreateCommand::new("filter")
        .description("Alterna un filtro de audio o lista los activos")
        .add_option(filter)
        .add_option(
            CreateCommandOption::new(CommandOptionType::Number, "strength", "Intensidad (1.0 por defecto)")
                .min_number_value(0.01),
        )
}

// Comandos de cola

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Limpia la cola de reproducción")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Configura el modo de repetición; sin modo alterna la canción actual")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "mode", "Modo de repetición")
                .add_string_choice("Desactivar", LoopMode::Off.id())
                .add_string_choice("Canción", LoopMode::Track.id())
                .add_string_choice("Cola", LoopMode::Queue.id()),
        )
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla la cola")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Quita una canción de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "index", "Posición en la cola (desde 1)")
                .min_int_value(1)
                .required(true),
        )
}

fn now_playing_command() -> CreateCommand {
    CreateCommand::new("now_playing").description("Muestra información de la canción actual")
}
