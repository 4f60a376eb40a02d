//! Startup configuration: one immutable struct built once and passed by
//! reference, replacing a sprawl of per-flag globals with a single value a
//! caller can construct, compare, and hand to every component that needs it.

/// Which 68k core to emulate. Only 68000/68010 are cycle-accurate; 68020 is
/// opcode-accurate only (`EC020`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuModel {
    /// Original 68000: no VBR, no loop mode, no misaligned access support.
    Mc68000,
    /// 68010: adds VBR, function codes, DBcc loop mode, format-8 bus fault.
    Mc68010,
    /// 68020 opcode compatibility only; cycle counts are not tabulated.
    Ec020,
}

impl CpuModel {
    /// `true` if this model's instruction timing is cycle-exact in this core.
    #[must_use]
    pub const fn is_cycle_exact(self) -> bool {
        matches!(self, Self::Mc68000 | Self::Mc68010)
    }

    /// `true` if this model tolerates misaligned word/long CPU accesses.
    #[must_use]
    pub const fn allows_misaligned_access(self) -> bool {
        matches!(self, Self::Ec020)
    }

    /// `true` if this model has a vector base register (non-zero VBR).
    #[must_use]
    pub const fn has_vbr(self) -> bool {
        !matches!(self, Self::Mc68000)
    }
}

/// Video timing standard. Determines beam line/frame geometry and
/// master-clock frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// 312/313 lines, 227/228 CCKs/line (long-line alternation), 28.375 MHz.
    Pal,
    /// 262/263 lines, 227 CCKs/line, 28.636 MHz.
    Ntsc,
}

impl Region {
    /// Nominal lines per frame (short form; long-line alternation adds one
    /// extra CCK on alternating PAL lines, not an extra line).
    #[must_use]
    pub const fn lines_per_frame(self) -> u16 {
        match self {
            Self::Pal => 312,
            Self::Ntsc => 262,
        }
    }
}

/// Which debug guard classes are installed and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugGuards {
    pub breakpoints: bool,
    pub watchpoints: bool,
    pub catchpoints: bool,
    pub beamtraps: bool,
}

/// Immutable configuration built once at startup and threaded by reference
/// through every component that needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    pub cpu_model: CpuModel,
    pub region: Region,
    /// Cross-check corner cases against the Musashi reference core. Never
    /// the default: division-overflow flags and MOVEM predecrement
    /// writeback timing differ when this is set.
    pub mimic_musashi: bool,
    pub guards: DebugGuards,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cpu_model: CpuModel::Mc68000,
            region: Region::Pal,
            mimic_musashi: false,
            guards: DebugGuards::default(),
        }
    }
}

impl CoreConfig {
    /// Build configuration from environment variables.
    ///
    /// Recognized variables: `AGNUS_CPU_MODEL` (`68000`|`68010`|`ec020`),
    /// `AGNUS_REGION` (`pal`|`ntsc`), `AGNUS_MIMIC_MUSASHI` (any value = on).
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(model) = std::env::var("AGNUS_CPU_MODEL") {
            cfg.cpu_model = match model.as_str() {
                "68010" => CpuModel::Mc68010,
                "ec020" => CpuModel::Ec020,
                _ => CpuModel::Mc68000,
            };
        }
        if let Ok(region) = std::env::var("AGNUS_REGION") {
            cfg.region = match region.as_str() {
                "ntsc" => Region::Ntsc,
                _ => Region::Pal,
            };
        }
        cfg.mimic_musashi = std::env::var("AGNUS_MIMIC_MUSASHI").is_ok();
        cfg
    }
}
