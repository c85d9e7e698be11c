use parking_lot::RwLock;
use tracing::info;

/// Filtros de audio disponibles (se traducen a expresiones de `-filter:a` de FFmpeg)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFilter {
    BassBoost,
    Pitch,
    Tempo,
    Nightcore,
    Slowdown,
    Reverb,
    Chorus,
    Distortion,
    Flanger,
    Tremolo,
    Vibrato,
    Phaser,
}

impl AudioFilter {
    pub const ALL: [AudioFilter; 12] = [
        AudioFilter::BassBoost,
        AudioFilter::Pitch,
        AudioFilter::Tempo,
        AudioFilter::Nightcore,
        AudioFilter::Slowdown,
        AudioFilter::Reverb,
        AudioFilter::Chorus,
        AudioFilter::Distortion,
        AudioFilter::Flanger,
        AudioFilter::Tremolo,
        AudioFilter::Vibrato,
        AudioFilter::Phaser,
    ];

    /// Identificador usado en los comandos slash.
    pub fn id(self) -> &'static str {
        match self {
            AudioFilter::BassBoost => "bassboost",
            AudioFilter::Pitch => "pitch",
            AudioFilter::Tempo => "tempo",
            AudioFilter::Nightcore => "nightcore",
            AudioFilter::Slowdown => "slowdown",
            AudioFilter::Reverb => "reverb",
            AudioFilter::Chorus => "chorus",
            AudioFilter::Distortion => "distortion",
            AudioFilter::Flanger => "flanger",
            AudioFilter::Tremolo => "tremolo",
            AudioFilter::Vibrato => "vibrato",
            AudioFilter::Phaser => "phaser",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|filter| filter.id() == id)
    }

    /// Construye el descriptor con la intensidad indicada.
    ///
    /// Sin intensidad se usan los parámetros por defecto de cada filtro; con
    /// intensidad cada parámetro por defecto se multiplica por ella. Distortion,
    /// Flanger y Phaser ignoran la intensidad.
    pub fn descriptor(self, strength: Option<f32>) -> MusicFilter {
        let s = strength.unwrap_or(1.0);
        let filter = match self {
            AudioFilter::BassBoost => MusicFilter::bass(10.0 * s, 100, 0.3),
            AudioFilter::Pitch => MusicFilter::pitch(s),
            AudioFilter::Tempo => MusicFilter::tempo(s),
            AudioFilter::Nightcore => MusicFilter::nightcore(1.15 * s, 1.25 * s),
            AudioFilter::Slowdown => MusicFilter::slowdown(0.83 * s, 0.87 * s),
            AudioFilter::Reverb => MusicFilter::reverb(0.8 * s, 0.9 * s, 1000.0 * s, 0.3 * s),
            AudioFilter::Chorus => {
                MusicFilter::chorus(0.5 * s, 0.9 * s, 60.0 * s, 0.4 * s, 0.25 * s, 2.0 * s)
            }
            AudioFilter::Distortion => MusicFilter::distortion(),
            AudioFilter::Flanger => MusicFilter::flanger(),
            AudioFilter::Tremolo => MusicFilter::tremolo(5.0, 0.8 * s),
            AudioFilter::Vibrato => MusicFilter::vibrato(5.0, 0.1 * s),
            AudioFilter::Phaser => MusicFilter::phaser(),
        };
        filter.with_strength(s)
    }
}

/// Descriptor inmutable de un filtro activo.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicFilter {
    pub kind: AudioFilter,
    /// Fragmento en sintaxis de filtergraph de FFmpeg.
    pub expression: String,
    pub name: &'static str,
    pub strength: f32,
}

impl MusicFilter {
    fn new(kind: AudioFilter, expression: String, name: &'static str) -> Self {
        Self {
            kind,
            expression,
            name,
            strength: 1.0,
        }
    }

    fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn bass(gain: f32, frequency: u32, bandwidth: f32) -> Self {
        Self::new(
            AudioFilter::BassBoost,
            format!("bass=g={}:f={}:w={}", gain, frequency, bandwidth),
            "Bass",
        )
    }

    pub fn pitch(pitch: f32) -> Self {
        Self::new(AudioFilter::Pitch, format!("rubberband=pitch={}", pitch), "Pitch")
    }

    pub fn tempo(tempo: f32) -> Self {
        Self::new(AudioFilter::Tempo, format!("atempo={}", clamp_tempo(tempo)), "Tempo")
    }

    pub fn nightcore(pitch: f32, tempo: f32) -> Self {
        Self::new(AudioFilter::Nightcore, resample_expression(pitch, tempo), "Nightcore")
    }

    pub fn slowdown(pitch: f32, tempo: f32) -> Self {
        Self::new(AudioFilter::Slowdown, resample_expression(pitch, tempo), "Slowdown")
    }

    pub fn reverb(in_gain: f32, out_gain: f32, delays: f32, decays: f32) -> Self {
        Self::new(
            AudioFilter::Reverb,
            format!(
                "aecho={}:{}:{}:{}",
                in_gain,
                out_gain,
                delays.clamp(0.0, 90000.0),
                decays.clamp(0.0, 1.0)
            ),
            "Reverb",
        )
    }

    pub fn chorus(
        in_gain: f32,
        out_gain: f32,
        delays: f32,
        decays: f32,
        speeds: f32,
        depths: f32,
    ) -> Self {
        Self::new(
            AudioFilter::Chorus,
            format!(
                "chorus={}:{}:{}:{}:{}:{}",
                in_gain, out_gain, delays, decays, speeds, depths
            ),
            "Chorus",
        )
    }

    pub fn distortion() -> Self {
        Self::new(
            AudioFilter::Distortion,
            "acrusher=bits=4:mix=0.8,volume=3.0,firequalizer=gain='if(between(f,1000,2000),15,0)'"
                .to_string(),
            "Distortion",
        )
    }

    pub fn flanger() -> Self {
        Self::new(AudioFilter::Flanger, "flanger".to_string(), "Flanger")
    }

    pub fn tremolo(frequency: f32, depth: f32) -> Self {
        Self::new(
            AudioFilter::Tremolo,
            format!(
                "tremolo=f={}:d={}",
                frequency.clamp(0.1, 20000.0),
                depth.clamp(0.0, 1.0)
            ),
            "Tremolo",
        )
    }

    pub fn vibrato(frequency: f32, depth: f32) -> Self {
        Self::new(
            AudioFilter::Vibrato,
            format!(
                "vibrato=f={}:d={}",
                frequency.clamp(0.1, 20000.0),
                depth.clamp(0.0, 1.0)
            ),
            "Vibrato",
        )
    }

    pub fn phaser() -> Self {
        Self::new(
            AudioFilter::Phaser,
            "aphaser=in_gain=0.9:out_gain=1.0:delay=4.5:decay=0.8:speed=1.5:type=t".to_string(),
            "Phaser",
        )
    }
}

fn clamp_tempo(tempo: f32) -> f32 {
    tempo.clamp(0.5, 2.0)
}

fn resample_expression(pitch: f32, tempo: f32) -> String {
    format!(
        "asetrate={},atempo={}",
        (48000.0 * pitch).round() as u32,
        clamp_tempo(tempo)
    )
}

/// Resultado de alternar un filtro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterToggle {
    Enabled,
    Disabled,
}

/// Conjunto de filtros activos de una guild, como máximo uno por tipo.
///
/// El orden de inserción es el orden de evaluación en la cadena de FFmpeg.
#[derive(Debug, Default)]
pub struct FilterChain {
    active: RwLock<Vec<MusicFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activa el filtro, o lo desactiva si ya estaba activo.
    pub fn toggle(&self, kind: AudioFilter, strength: Option<f32>) -> FilterToggle {
        let mut active = self.active.write();
        if let Some(index) = active.iter().position(|f| f.kind == kind) {
            active.remove(index);
            info!("🎛️ Filtro '{}' desactivado", kind.id());
            FilterToggle::Disabled
        } else {
            active.push(kind.descriptor(strength));
            info!("🎛️ Filtro '{}' activado", kind.id());
            FilterToggle::Enabled
        }
    }

    /// Copia de los filtros activos en orden de inserción.
    pub fn snapshot(&self) -> Vec<MusicFilter> {
        self.active.read().clone()
    }

    /// Desactiva todos los filtros. Devuelve `true` si había alguno.
    pub fn clear(&self) -> bool {
        let mut active = self.active.write();
        let had_filters = !active.is_empty();
        active.clear();
        if had_filters {
            info!("🔄 Todos los filtros desactivados");
        }
        had_filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bass_strength_scales_gain() {
        let filter = AudioFilter::BassBoost.descriptor(Some(2.0));
        assert_eq!(filter.expression, "bass=g=20:f=100:w=0.3");
        assert_eq!(filter.strength, 2.0);
        assert_eq!(filter.name, "Bass");
    }

    #[test]
    fn default_strength_is_one() {
        let filter = AudioFilter::BassBoost.descriptor(None);
        assert_eq!(filter.expression, "bass=g=10:f=100:w=0.3");
        assert_eq!(filter.strength, 1.0);
    }

    #[test]
    fn nightcore_renders_rate_and_tempo() {
        let filter = AudioFilter::Nightcore.descriptor(None);
        assert_eq!(filter.expression, "asetrate=55200,atempo=1.25");
    }

    #[test]
    fn tempo_is_clamped() {
        assert_eq!(AudioFilter::Tempo.descriptor(Some(5.0)).expression, "atempo=2");
        assert_eq!(AudioFilter::Tempo.descriptor(Some(0.1)).expression, "atempo=0.5");
    }

    #[test]
    fn fixed_filters_ignore_strength() {
        assert_eq!(
            AudioFilter::Flanger.descriptor(Some(3.0)).expression,
            AudioFilter::Flanger.descriptor(None).expression
        );
        assert_eq!(
            AudioFilter::Distortion.descriptor(Some(3.0)).expression,
            AudioFilter::Distortion.descriptor(None).expression
        );
    }

    #[test]
    fn toggle_adds_then_removes() {
        let chain = FilterChain::new();
        assert_eq!(chain.toggle(AudioFilter::Reverb, None), FilterToggle::Enabled);
        assert_eq!(chain.snapshot()[0].kind, AudioFilter::Reverb);
        assert_eq!(chain.toggle(AudioFilter::Reverb, Some(2.0)), FilterToggle::Disabled);
        assert!(chain.snapshot().is_empty());
    }

    #[test]
    fn snapshot_keeps_insertion_order() {
        let chain = FilterChain::new();
        chain.toggle(AudioFilter::Tremolo, None);
        chain.toggle(AudioFilter::BassBoost, None);
        chain.toggle(AudioFilter::Flanger, None);
        chain.toggle(AudioFilter::BassBoost, None);
        chain.toggle(AudioFilter::Pitch, None);

        let kinds: Vec<_> = chain.snapshot().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![AudioFilter::Tremolo, AudioFilter::Flanger, AudioFilter::Pitch]
        );
    }

    #[test]
    fn ids_round_trip() {
        for filter in AudioFilter::ALL {
            assert_eq!(AudioFilter::from_id(filter.id()), Some(filter));
        }
        assert_eq!(AudioFilter::from_id("karaoke"), None);
    }
}
