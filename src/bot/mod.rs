//! # Bot Module
//!
//! Discord front-end for Guild Music.
//!
//! [`GuildMusicBot`] implements Serenity's [`EventHandler`]: it registers the
//! slash commands, routes interactions to [`handlers`], and stops a guild's
//! engine when the bot is disconnected from voice.
//!
//! Playback state lives in the per-guild engines held by the
//! [`EngineRegistry`]; the bot only owns the configuration and the voice
//! transport the engines are created with.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{
        engine::MusicEngine,
        registry::{EngineKind, EngineRegistry},
        voice::VoiceTransport,
    },
    config::Config,
};

/// Main Discord event handler.
///
/// ## Fields
///
/// - `config`: Bot configuration (tokens, limits, privileged user)
/// - `registry`: Per-guild engines, shared by every handler
/// - `transport`: Voice transport handed to new engines
pub struct GuildMusicBot {
    pub config: Arc<Config>,
    pub registry: Arc<EngineRegistry>,
    transport: Arc<dyn VoiceTransport>,
}

impl GuildMusicBot {
    pub fn new(config: Config, transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(EngineRegistry::new()),
            transport,
        }
    }

    /// Motor de música de la guild; se crea en el primer comando.
    pub fn engine(&self, guild_id: GuildId) -> Arc<MusicEngine> {
        self.registry.music_or_create(guild_id, || {
            MusicEngine::new(guild_id, self.config.player_settings(), self.transport.clone())
        })
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set the commands are registered for that guild only
    /// (instant propagation, useful for development); otherwise globally.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'."
                    )
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'."
                    )
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for GuildMusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si el bot sale del canal de voz (expulsado o desconectado), el motor
    /// de la guild se detiene. Los avisos de cierres del propio motor no.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let Some(old) = old else {
            return;
        };
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(engine) = self.registry.music(guild_id) else {
            return;
        };

        engine.handle_voice_disconnect(old.channel_id).await;
    }

    /// Al salir de una guild su motor se detiene y se descarta.
    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Caída temporal de Discord, la guild sigue existiendo
        if incomplete.unavailable {
            return;
        }

        if let Some(engine) = self.registry.music(incomplete.id) {
            engine.stop().await;
        }
        self.registry.remove(incomplete.id, EngineKind::Music);
        info!(
            "👋 Guild {} abandonada, {} guilds con motor",
            incomplete.id,
            self.registry.guild_count()
        );
    }
}
