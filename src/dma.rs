//! Agnus DMA bus arbiter.
//!
//! Every DMA cycle belongs to exactly one owner, decided by a fixed
//! priority table keyed on the current beam position: refresh and disk and
//! audio and sprites own fixed slots early in the line, bitplane fetch and
//! the Copper compete for the remaining slots in the active display window,
//! and whatever neither claims falls through to the CPU (or to the
//! Blitter, if it is running in "nasty" BLTPRI mode and steals free/CPU
//! slots). The arbitration order and the bitplane fetch-group interleaving
//! below follow the classic Agnus slot table.

use crate::beam::{Beam, BusOwner};
use crate::memory::MemoryMap;

const DMACON_DMAEN: u16 = 0x0200;
const DMACON_BLTPRI: u16 = 0x0400;
pub const DMACON_AUD0EN: u16 = 0x0001;
pub const DMACON_DSKEN: u16 = 0x0010;
pub const DMACON_SPREN: u16 = 0x0020;
pub const DMACON_BLTEN: u16 = 0x0040;
pub const DMACON_COPEN: u16 = 0x0080;
pub const DMACON_BPLEN: u16 = 0x0100;

/// Maps position (0-7) within an 8-cycle bitplane fetch group to a plane
/// index. `None` is a free slot available to Copper/CPU within the group.
const LOWRES_DDF_TO_PLANE: [Option<u8>; 8] = [
    None,
    Some(3),
    Some(5),
    Some(1),
    None,
    Some(2),
    Some(4),
    Some(0),
];

/// Per-channel DMA pointer state the arbiter advances on a granted cycle.
#[derive(Debug, Clone)]
pub struct DmaPointers {
    pub bitplane: [u32; 6],
    pub audio: [u32; 4],
    pub sprite: [u32; 8],
    pub disk: u32,
}

impl Default for DmaPointers {
    fn default() -> Self {
        Self {
            bitplane: [0; 6],
            audio: [0; 4],
            sprite: [0; 8],
            disk: 0,
        }
    }
}

/// Inputs the arbiter needs from the rest of the chipset each cycle. Kept
/// as a plain struct rather than borrowing the register file directly so
/// the arbitration decision is a pure function of a cheap snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DmaInputs {
    pub dmacon: u16,
    pub bplcon0: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,
    pub blitter_busy: bool,
}

impl DmaInputs {
    fn dma_master_enabled(self) -> bool {
        self.dmacon & DMACON_DMAEN != 0
    }

    fn channel_enabled(self, bit: u16) -> bool {
        self.dma_master_enabled() && self.dmacon & bit != 0
    }

    fn num_bitplanes(self) -> u8 {
        ((self.bplcon0 >> 12) & 0x07).min(6) as u8
    }

    fn blitter_nasty_active(self) -> bool {
        self.blitter_busy && self.channel_enabled(DMACON_BLTEN) && self.dmacon & DMACON_BLTPRI != 0
    }
}

/// Reserved cycles nobody may use: the line-start sync slot and the two
/// slots at the end of the display window colour-burst shares with it.
const RESERVED_H: [u16; 3] = [0x00, 0xe0, 0xe1];

/// Consecutive free slots a nasty (`BLTPRI`) Blitter may take from the CPU
/// before the arbiter yields one back, so `BLTPRI` throttles the CPU
/// instead of starving it outright.
const BLS_YIELD_AFTER: u32 = 3;

/// Outcome of arbitrating one DMA cycle: who owns the bus, and whether the
/// Blitter may make coarse progress this cycle (it progresses on CPU/free
/// slots whenever it is busy and enabled, nasty or not, except on a cycle
/// the arbiter just yielded back to the CPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleGrant {
    pub owner: BusOwner,
    pub blitter_progress: bool,
}

/// Agnus DMA arbiter. The fixed priority table alone is a pure function of
/// beam position; the only state this carries across cycles is the BLS
/// yield streak the nasty Blitter wears down against the CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arbiter {
    cpu_yield_streak: u32,
}

impl Arbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the owner of the DMA cycle at the current beam position.
    pub fn arbitrate(&mut self, beam: &Beam, inputs: DmaInputs) -> CycleGrant {
        let h = beam.h;
        if RESERVED_H.contains(&h) {
            self.cpu_yield_streak = 0;
            return CycleGrant { owner: BusOwner::Blocked, blitter_progress: false };
        }

        let owner = match h {
            0x01..=0x03 | 0x1b => BusOwner::Refresh,
            0x04..=0x06 => {
                if inputs.channel_enabled(DMACON_DSKEN) {
                    BusOwner::Disk
                } else {
                    BusOwner::None
                }
            }
            0x07..=0x0a => {
                let channel = (h - 0x07) as u8;
                if inputs.channel_enabled(DMACON_AUD0EN << channel) {
                    BusOwner::Audio(channel)
                } else {
                    BusOwner::None
                }
            }
            0x0b..=0x1a => {
                if inputs.channel_enabled(DMACON_SPREN) {
                    BusOwner::Sprite(((h - 0x0b) / 2) as u8)
                } else {
                    BusOwner::None
                }
            }
            0x1c..=0xe2 => bitplane_or_copper(beam, inputs),
            _ => BusOwner::None,
        };

        let nasty = inputs.blitter_nasty_active();
        let is_free = matches!(owner, BusOwner::None);
        let blitter_contends = is_free && nasty && inputs.channel_enabled(DMACON_BLTEN);

        let mut yielded = false;
        let owner = if is_free {
            if blitter_contends {
                if self.cpu_yield_streak >= BLS_YIELD_AFTER {
                    self.cpu_yield_streak = 0;
                    yielded = true;
                    BusOwner::Cpu
                } else {
                    self.cpu_yield_streak += 1;
                    BusOwner::Blitter
                }
            } else {
                BusOwner::Cpu
            }
        } else {
            owner
        };

        if !blitter_contends {
            self.cpu_yield_streak = 0;
        }

        let blitter_progress =
            is_free && inputs.blitter_busy && inputs.channel_enabled(DMACON_BLTEN) && !yielded;

        CycleGrant { owner, blitter_progress }
    }
}

fn bitplane_or_copper(beam: &Beam, inputs: DmaInputs) -> BusOwner {
    let h = beam.h;
    let num_bpl = inputs.num_bitplanes();
    if inputs.channel_enabled(DMACON_BPLEN)
        && num_bpl > 0
        && h >= inputs.ddfstrt
        && h <= inputs.ddfstop + 7
    {
        let pos_in_group = ((h - inputs.ddfstrt) % 8) as usize;
        if let Some(plane) = LOWRES_DDF_TO_PLANE[pos_in_group] {
            if plane < num_bpl {
                return BusOwner::Bitplane(plane);
            }
        }
    }
    if inputs.channel_enabled(DMACON_COPEN) && h % 2 == 0 {
        return BusOwner::Copper;
    }
    BusOwner::None
}

/// Fetch the word at a channel pointer, advancing it by 2 with chip-RAM
/// wraparound, for a cycle the arbiter granted to that channel.
pub fn service_fetch(mem: &MemoryMap, pointer: &mut u32) -> u16 {
    let word = mem.read_word(*pointer).unwrap_or(0);
    *pointer = mem.wrap_chip_pointer(pointer.wrapping_add(2));
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(dmacon: u16) -> DmaInputs {
        DmaInputs { dmacon, bplcon0: 0, ddfstrt: 0x1c, ddfstop: 0xd8, blitter_busy: false }
    }

    #[test]
    fn audio_slot_granted_when_channel_enabled() {
        let mut beam = Beam::new();
        beam.h = 0x07;
        let grant = Arbiter::new().arbitrate(&beam, inputs(DMACON_DMAEN | DMACON_AUD0EN));
        assert_eq!(grant.owner, BusOwner::Audio(0));
    }

    #[test]
    fn copper_claims_even_free_slots_in_display_window() {
        let mut beam = Beam::new();
        beam.h = 0x1c;
        let grant = Arbiter::new().arbitrate(&beam, inputs(DMACON_DMAEN | DMACON_COPEN));
        assert_eq!(grant.owner, BusOwner::Copper);
    }

    #[test]
    fn bitplane_fetch_group_honors_plane_count() {
        let mut beam = Beam::new();
        beam.h = 0x23; // ddfstrt(0x1c) + 7 -> BPL1 slot per fetch-group table
        let mut cfg = inputs(DMACON_DMAEN | DMACON_BPLEN);
        cfg.bplcon0 = 1 << 12;
        cfg.ddfstrt = 0x1c;
        cfg.ddfstop = 0x1c;
        let grant = Arbiter::new().arbitrate(&beam, cfg);
        assert_eq!(grant.owner, BusOwner::Bitplane(0));
    }

    #[test]
    fn free_slot_falls_to_cpu_when_blitter_idle() {
        let beam = Beam::new();
        let grant = Arbiter::new().arbitrate(&beam, inputs(DMACON_DMAEN));
        assert_eq!(grant.owner, BusOwner::Cpu);
    }

    #[test]
    fn nasty_blitter_steals_free_slot_from_cpu() {
        let beam = Beam::new();
        let mut cfg = inputs(DMACON_DMAEN | DMACON_BLTEN | DMACON_BLTPRI);
        cfg.blitter_busy = true;
        let grant = Arbiter::new().arbitrate(&beam, cfg);
        assert_eq!(grant.owner, BusOwner::Blitter);
        assert!(grant.blitter_progress);
    }

    #[test]
    fn non_nasty_busy_blitter_still_progresses_without_stealing_bus() {
        let beam = Beam::new();
        let mut cfg = inputs(DMACON_DMAEN | DMACON_BLTEN);
        cfg.blitter_busy = true;
        let grant = Arbiter::new().arbitrate(&beam, cfg);
        assert_eq!(grant.owner, BusOwner::Cpu);
        assert!(grant.blitter_progress);
    }

    #[test]
    fn reserved_cycles_are_blocked_from_cpu_and_blitter() {
        let mut beam = Beam::new();
        beam.h = 0xe0;
        let mut cfg = inputs(DMACON_DMAEN | DMACON_BLTEN | DMACON_BLTPRI);
        cfg.blitter_busy = true;
        let grant = Arbiter::new().arbitrate(&beam, cfg);
        assert_eq!(grant.owner, BusOwner::Blocked);
        assert!(!grant.blitter_progress);
    }

    #[test]
    fn nasty_blitter_yields_the_bus_to_cpu_every_fourth_contended_cycle() {
        let beam = Beam::new();
        let mut cfg = inputs(DMACON_DMAEN | DMACON_BLTEN | DMACON_BLTPRI);
        cfg.blitter_busy = true;
        let mut arbiter = Arbiter::new();
        let owners: Vec<_> = (0..4).map(|_| arbiter.arbitrate(&beam, cfg).owner).collect();
        assert_eq!(
            owners,
            vec![BusOwner::Blitter, BusOwner::Blitter, BusOwner::Blitter, BusOwner::Cpu]
        );
        // The streak resets after a yield, so the next three go to the Blitter again.
        let grant = arbiter.arbitrate(&beam, cfg);
        assert_eq!(grant.owner, BusOwner::Blitter);
    }

    #[test]
    fn service_fetch_advances_pointer_with_wraparound() {
        let mem = MemoryMap::new(128 * 1024, vec![0; 16]);
        let mut ptr = 128 * 1024 - 2;
        service_fetch(&mem, &mut ptr);
        assert_eq!(ptr, 0);
    }
}
