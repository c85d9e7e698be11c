use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, info};

use super::engine::MusicEngine;
use crate::error::{MusicError, MusicResult};

/// Tipo de motor. Una guild tiene como mucho un motor de cada tipo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Music,
    #[allow(dead_code)] // Para motores que no son de música
    Custom(&'static str),
}

/// Motor registrable que no es el de música.
#[allow(dead_code)]
pub trait GuildEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
}

#[derive(Clone)]
pub enum EngineHandle {
    Music(Arc<MusicEngine>),
    #[allow(dead_code)]
    Custom(Arc<dyn GuildEngine>),
}

impl EngineHandle {
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineHandle::Music(_) => EngineKind::Music,
            EngineHandle::Custom(engine) => engine.kind(),
        }
    }
}

/// Registro de motores por guild, compartido entre todos los handlers.
#[derive(Default)]
pub struct EngineRegistry {
    guilds: DashMap<GuildId, HashMap<EngineKind, EngineHandle>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un motor nuevo. Falla si la guild ya tiene uno del mismo tipo.
    #[allow(dead_code)]
    pub fn register(&self, guild_id: GuildId, handle: EngineHandle) -> MusicResult<()> {
        let kind = handle.kind();
        let mut engines = self.guilds.entry(guild_id).or_default();

        if engines.contains_key(&kind) {
            error!("❌ Motor {:?} duplicado para guild {}", kind, guild_id);
            return Err(MusicError::DuplicateEngine { guild_id, kind });
        }

        engines.insert(kind, handle);
        info!("🆕 Motor {:?} registrado para guild {}", kind, guild_id);
        Ok(())
    }

    pub fn get(&self, guild_id: GuildId, kind: EngineKind) -> Option<EngineHandle> {
        self.guilds.get(&guild_id)?.get(&kind).cloned()
    }

    pub fn music(&self, guild_id: GuildId) -> Option<Arc<MusicEngine>> {
        match self.get(guild_id, EngineKind::Music)? {
            EngineHandle::Music(engine) => Some(engine),
            EngineHandle::Custom(_) => None,
        }
    }

    /// Devuelve el motor de música de la guild, creándolo si no existe.
    pub fn music_or_create(&self, guild_id: GuildId, create: impl FnOnce() -> MusicEngine) -> Arc<MusicEngine> {
        let mut engines = self.guilds.entry(guild_id).or_default();

        if let Some(EngineHandle::Music(engine)) = engines.get(&EngineKind::Music) {
            return engine.clone();
        }

        let engine = Arc::new(create());
        engines.insert(EngineKind::Music, EngineHandle::Music(engine.clone()));
        info!("🆕 Motor de música creado para guild {}", guild_id);
        engine
    }

    /// Elimina el motor; la guild desaparece del registro si queda vacía.
    pub fn remove(&self, guild_id: GuildId, kind: EngineKind) -> Option<EngineHandle> {
        let removed = self.guilds.get_mut(&guild_id)?.remove(&kind);
        self.guilds.remove_if(&guild_id, |_, engines| engines.is_empty());

        if removed.is_some() {
            debug!("🗑️ Motor {:?} eliminado de guild {}", kind, guild_id);
        }
        removed
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}
