//! Beam position and the per-cycle bus-owner vector.
//!
//! The wrap-on-line/wrap-on-frame shape follows the usual Agnus beam
//! counter; generalized here to carry PAL long-line alternation (227 vs.
//! 228 CCKs/line) rather than a fixed line length.

use crate::config::Region;

/// Nominal CCKs (DMA cycles) per horizontal line before long-line adjustment.
pub const PAL_CCKS_PER_LINE: u16 = 227;
pub const NTSC_CCKS_PER_LINE: u16 = 227;

/// Who owns the bus for a given DMA cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOwner {
    None,
    Refresh,
    Disk,
    Audio(u8),
    Sprite(u8),
    Bitplane(u8),
    Copper,
    Blitter,
    Cpu,
    /// Reserved cycle (E0/E1) nobody may use.
    Blocked,
}

/// (v, h) position the chipset would currently be rasterizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Beam {
    pub v: u16,
    pub h: u16,
    /// Toggles every PAL frame; when set, the current line is long (228 CCKs).
    pub long_line: bool,
}

impl Beam {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// CCKs in the current line, accounting for PAL long-line alternation.
    #[must_use]
    pub fn ccks_this_line(&self, region: Region) -> u16 {
        match region {
            Region::Ntsc => NTSC_CCKS_PER_LINE,
            Region::Pal => {
                if self.long_line {
                    PAL_CCKS_PER_LINE + 1
                } else {
                    PAL_CCKS_PER_LINE
                }
            }
        }
    }

    /// Advance by one DMA cycle. Wraps `h` into `v`, wraps `v` into a new
    /// frame, and toggles `long_line` once per PAL frame boundary.
    pub fn advance(&mut self, region: Region) {
        self.h += 1;
        if self.h >= self.ccks_this_line(region) {
            self.h = 0;
            self.v += 1;
            if self.v >= region.lines_per_frame() {
                self.v = 0;
                if region == Region::Pal {
                    self.long_line = !self.long_line;
                }
            }
        }
    }

    /// `true` on the cycle that starts vertical blank (line 0).
    #[must_use]
    pub fn is_vblank_start(&self) -> bool {
        self.v == 0 && self.h == 0
    }

    /// Master cycle corresponding to position `(v, h)` within the current
    /// frame, used by `schedule_pos`-style positional scheduling.
    #[must_use]
    pub fn cycles_until(&self, target_v: u16, target_h: u16, region: Region) -> u64 {
        let ccks_per_line = u64::from(self.ccks_this_line(region));
        let cur = u64::from(self.v) * ccks_per_line + u64::from(self.h);
        let target = u64::from(target_v) * ccks_per_line + u64::from(target_h);
        let frame_len = u64::from(region.lines_per_frame()) * ccks_per_line;
        if target >= cur {
            (target - cur) * 8
        } else {
            (frame_len - cur + target) * 8
        }
    }
}

/// Per-`h` bus ownership for the current line.
///
/// Reset at the start of each line; this is not itself timed — Agnus writes
/// one entry per DMA cycle as it arbitrates, and readers (CPU accessor,
/// Copper, Blitter, telemetry) consult the entry for the current `h`.
#[derive(Debug, Clone)]
pub struct BusOwnerVector {
    entries: Vec<BusOwner>,
}

impl BusOwnerVector {
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            entries: vec![BusOwner::None; width],
        }
    }

    pub fn reset_line(&mut self) {
        self.entries.fill(BusOwner::None);
    }

    pub fn set(&mut self, h: u16, owner: BusOwner) {
        if let Some(slot) = self.entries.get_mut(h as usize) {
            *slot = owner;
        }
    }

    #[must_use]
    pub fn get(&self, h: u16) -> BusOwner {
        self.entries.get(h as usize).copied().unwrap_or(BusOwner::None)
    }

    /// At least one CPU entry iff any CPU memory access occurred this line.
    #[must_use]
    pub fn any_cpu_access(&self) -> bool {
        self.entries.iter().any(|o| matches!(o, BusOwner::Cpu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_wraps_h_into_v() {
        let mut beam = Beam::new();
        beam.h = PAL_CCKS_PER_LINE - 1;
        beam.advance(Region::Pal);
        assert_eq!(beam.h, 0);
        assert_eq!(beam.v, 1);
    }

    #[test]
    fn beam_wraps_v_into_new_frame_and_toggles_long_line() {
        let mut beam = Beam::new();
        beam.v = Region::Pal.lines_per_frame() - 1;
        beam.h = PAL_CCKS_PER_LINE - 1;
        let was_long = beam.long_line;
        beam.advance(Region::Pal);
        assert_eq!(beam.v, 0);
        assert_eq!(beam.h, 0);
        assert_eq!(beam.long_line, !was_long);
    }

    #[test]
    fn bus_owner_vector_tracks_cpu_access() {
        let mut vec = BusOwnerVector::new(228);
        vec.reset_line();
        assert!(!vec.any_cpu_access());
        vec.set(10, BusOwner::Cpu);
        assert!(vec.any_cpu_access());
        assert_eq!(vec.get(10), BusOwner::Cpu);
        assert_eq!(vec.get(11), BusOwner::None);
    }

    #[test]
    fn cycles_until_handles_wraparound() {
        let beam = Beam { v: 100, h: 50, long_line: false };
        let direct = beam.cycles_until(100, 60, Region::Pal);
        assert_eq!(direct, 10 * 8);
        let wrapped = beam.cycles_until(100, 40, Region::Pal);
        let frame_len = u64::from(Region::Pal.lines_per_frame()) * u64::from(PAL_CCKS_PER_LINE);
        assert_eq!(wrapped, (frame_len - 10) * 8);
    }
}
