use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{collections::VecDeque, path::Path};
use tracing::{debug, info};

use crate::error::{MusicError, MusicResult};

/// Canción en cola. Inmutable una vez creada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackItem {
    /// URL o ruta local
    pub source_ref: String,
    pub title: String,
    pub is_local_file: bool,
    pub author: String,
    /// Segundos; 0 si se desconoce
    pub duration_secs: u32,
}

impl TrackItem {
    pub fn remote(
        url: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        duration_secs: u32,
    ) -> Self {
        Self {
            source_ref: url.into(),
            title: title.into(),
            is_local_file: false,
            author: author.into(),
            duration_secs,
        }
    }

    pub fn local(path: &Path) -> Self {
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            source_ref: path.display().to_string(),
            title,
            is_local_file: true,
            author: "Archivo local".to_string(),
            duration_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Cada canción se reproduce una vez
    #[default]
    Off,
    /// Repite la canción actual
    Track,
    /// Al terminar, la canción vuelve al final de la cola
    Queue,
}

impl LoopMode {
    pub fn id(self) -> &'static str {
        match self {
            LoopMode::Off => "none",
            LoopMode::Track => "song",
            LoopMode::Queue => "queue",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "none" | "off" => Some(LoopMode::Off),
            "song" | "track" => Some(LoopMode::Track),
            "queue" => Some(LoopMode::Queue),
            _ => None,
        }
    }
}

/// Cola FIFO compartida entre los comandos y la tarea de reproducción.
///
/// Cada operación toma el lock una sola vez, así que las reconstrucciones
/// (agregar al frente, quitar el último, mezclar, quitar por índice) nunca se
/// observan a medias ni pierden elementos encolados en paralelo.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: Mutex<VecDeque<TrackItem>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola
    pub fn enqueue(&self, item: TrackItem) {
        info!("➕ Agregado a la cola: {}", item.title);
        self.items.lock().push_back(item);
    }

    /// Obtiene el siguiente track según el modo de loop.
    ///
    /// - `Off`: lo saca de la cola.
    /// - `Track`: lo deja en la cabeza (se repetirá).
    /// - `Queue`: lo saca y lo vuelve a poner al final.
    pub fn advance(&self, mode: LoopMode) -> Option<TrackItem> {
        let mut items = self.items.lock();
        match mode {
            LoopMode::Off => items.pop_front(),
            LoopMode::Track => {
                let head = items.front().cloned();
                if let Some(ref item) = head {
                    info!("🔂 Repitiendo track: {}", item.title);
                }
                head
            }
            LoopMode::Queue => {
                let head = items.pop_front()?;
                debug!("🔁 Track agregado al final por loop de cola: {}", head.title);
                items.push_back(head.clone());
                Some(head)
            }
        }
    }

    /// Ajusta la cola cuando el modo de loop cambió mientras `finished` sonaba.
    pub fn reconcile(&self, old_mode: LoopMode, new_mode: LoopMode, finished: &TrackItem) {
        if old_mode == new_mode {
            return;
        }

        debug!("🔄 Loop cambiado durante la reproducción: {:?} -> {:?}", old_mode, new_mode);
        match (old_mode, new_mode) {
            // Nunca se sacó de la cola
            (LoopMode::Track, LoopMode::Off) => {
                self.remove_first();
            }
            // Deshacer el reencolado automático
            (LoopMode::Queue, LoopMode::Off) => {
                self.remove_last();
            }
            (_, LoopMode::Queue) => self.enqueue(finished.clone()),
            (_, LoopMode::Track) => self.add_to_front(finished.clone()),
            (LoopMode::Off, LoopMode::Off) => {}
        }
    }

    pub fn add_to_front(&self, item: TrackItem) {
        self.items.lock().push_front(item);
    }

    pub fn remove_first(&self) -> Option<TrackItem> {
        self.items.lock().pop_front()
    }

    pub fn remove_last(&self) -> Option<TrackItem> {
        self.items.lock().pop_back()
    }

    /// Elimina el elemento en la posición `index` (empezando en 1).
    pub fn remove_at(&self, index: usize) -> MusicResult<TrackItem> {
        let mut items = self.items.lock();
        let len = items.len();
        if index == 0 || index > len {
            return Err(MusicError::InvalidIndex { index, len });
        }

        let removed = items
            .remove(index - 1)
            .ok_or(MusicError::InvalidIndex { index, len })?;
        debug!("❌ Track eliminado en posición {}", index);
        Ok(removed)
    }

    /// Mezcla la cola. Devuelve la cantidad de elementos mezclados.
    pub fn shuffle(&self) -> MusicResult<usize> {
        let mut items = self.items.lock();
        if items.is_empty() {
            return Err(MusicError::QueueEmpty);
        }

        if items.len() > 1 {
            let mut rng = rand::thread_rng();
            items.make_contiguous().shuffle(&mut rng);
            info!("🔀 Cola mezclada ({} canciones)", items.len());
        }
        Ok(items.len())
    }

    /// Limpia la cola
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let cleared = items.len();
        items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TrackItem> {
        self.items.lock().iter().cloned().collect()
    }

    /// Obtiene una página de la cola (páginas desde 1, se limita a la última).
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items = self.snapshot();
        let items_per_page = items_per_page.max(1);
        let total_pages = items.len().div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(items.len());

        QueuePage {
            items: items.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            current_page,
            total_pages,
            total_items: items.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<TrackItem>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
