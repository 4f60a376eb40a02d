//! Copper display-list coprocessor: MOVE/WAIT/SKIP and the per-VBL restart.
//!
//! The Copper executes a list of 32-bit words fetched two at a time from
//! chip RAM on its granted DMA cycles. A MOVE instruction writes its second
//! word to the register addressed by its first (subject to the COPCON
//! "dangerous" gate on writes below the safe register boundary); a WAIT or
//! SKIP instruction compares the current beam position, masked, against an
//! embedded target and either stalls fetching (WAIT) or skips the next
//! instruction (SKIP) until the comparison is satisfied.

use crate::beam::Beam;
use crate::bytes::ByteCursor;
use crate::memory::MemoryMap;

/// First writable custom register offset; MOVE targets below this are
/// "dangerous" and require COPCON's danger bit to be set.
const DANGEROUS_BOUNDARY: u16 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    /// Waiting to fetch the first word of the next instruction.
    First,
    /// First word fetched; waiting to fetch the second.
    Second { first: u16 },
}

/// One decoded Copper instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction {
    Move { reg: u16, value: u16 },
    Wait { vp: u8, hp: u8, ve_mask: u8, he_mask: u8, blitter_wait: bool },
    Skip { vp: u8, hp: u8, ve_mask: u8, he_mask: u8, blitter_wait: bool },
}

fn decode(first: u16, second: u16) -> Instruction {
    if first & 1 == 0 {
        Instruction::Move { reg: first & 0x1fe, value: second }
    } else if second & 1 == 0 {
        Instruction::Wait {
            vp: (first >> 8) as u8,
            hp: (first & 0xfe) as u8,
            ve_mask: (second >> 8) as u8 & 0x7f,
            he_mask: (second & 0xfe) as u8,
            blitter_wait: second & 0x8000 == 0,
        }
    } else {
        Instruction::Skip {
            vp: (first >> 8) as u8,
            hp: (first & 0xfe) as u8,
            ve_mask: (second >> 8) as u8 & 0x7f,
            he_mask: (second & 0xfe) as u8,
            blitter_wait: second & 0x8000 == 0,
        }
    }
}

fn beam_matches(beam: &Beam, vp: u8, hp: u8, ve_mask: u8, he_mask: u8) -> bool {
    let v = (beam.v as u8) & ve_mask;
    let h = (beam.h as u8) & he_mask;
    v >= (vp & ve_mask) && h >= (hp & he_mask)
}

/// A write a completed MOVE instruction wants applied to the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopperWrite {
    pub reg: u16,
    pub value: u16,
}

#[derive(Debug, Clone)]
pub struct Copper {
    pc: u32,
    fetch: FetchState,
    /// Set while parked on an unsatisfied WAIT; the Copper does not request
    /// DMA cycles until the beam catches up.
    waiting: Option<(u8, u8, u8, u8)>,
    /// `true` once a SKIP has determined the following MOVE should be
    /// skipped rather than executed.
    skip_next: bool,
    danger: bool,
}

impl Default for Copper {
    fn default() -> Self {
        Self::new()
    }
}

impl Copper {
    #[must_use]
    pub fn new() -> Self {
        Self { pc: 0, fetch: FetchState::First, waiting: None, skip_next: false, danger: false }
    }

    pub fn set_danger(&mut self, danger: bool) {
        self.danger = danger;
    }

    /// Pack state for snapshotting.
    #[must_use]
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.pc.to_le_bytes());
        match self.fetch {
            FetchState::First => {
                buf.push(0);
                buf.extend_from_slice(&0u16.to_le_bytes());
            }
            FetchState::Second { first } => {
                buf.push(1);
                buf.extend_from_slice(&first.to_le_bytes());
            }
        }
        match self.waiting {
            Some((vp, hp, ve_mask, he_mask)) => buf.extend_from_slice(&[1, vp, hp, ve_mask, he_mask]),
            None => buf.extend_from_slice(&[0, 0, 0, 0, 0]),
        }
        buf.push(u8::from(self.skip_next));
        buf.push(u8::from(self.danger));
        buf
    }

    /// Restore state packed by [`Self::snapshot_bytes`].
    pub fn restore_bytes(&mut self, bytes: &[u8]) -> Option<()> {
        let mut cursor = ByteCursor::new(bytes);
        self.pc = cursor.take_u32()?;
        self.fetch = match cursor.take_u8()? {
            1 => FetchState::Second { first: cursor.take_u16()? },
            _ => {
                cursor.take_u16()?;
                FetchState::First
            }
        };
        let has_waiting = cursor.take_u8()? != 0;
        let (vp, hp, ve_mask, he_mask) =
            (cursor.take_u8()?, cursor.take_u8()?, cursor.take_u8()?, cursor.take_u8()?);
        self.waiting = has_waiting.then_some((vp, hp, ve_mask, he_mask));
        self.skip_next = cursor.take_u8()? != 0;
        self.danger = cursor.take_u8()? != 0;
        Some(())
    }

    /// Jump to a new list start, as COP1LC/COP2LC + COPJMP or the per-VBL
    /// auto-restart to COP1LC does.
    pub fn jump(&mut self, address: u32) {
        self.pc = address;
        self.fetch = FetchState::First;
        self.waiting = None;
        self.skip_next = false;
    }

    /// `true` if the Copper is currently parked on a WAIT and therefore
    /// does not want this cycle's DMA grant.
    #[must_use]
    pub fn is_waiting(&self, beam: &Beam) -> bool {
        match self.waiting {
            Some((vp, hp, ve_mask, he_mask)) => !beam_matches(beam, vp, hp, ve_mask, he_mask),
            None => false,
        }
    }

    /// Run one granted DMA cycle: fetch a word, and on the second word of
    /// an instruction, decode and (for MOVE) return the register write to
    /// apply. Returns `None` on a fetch-only cycle or a WAIT/SKIP outcome.
    pub fn step(&mut self, mem: &MemoryMap, beam: &Beam) -> Option<CopperWrite> {
        if let Some((vp, hp, ve_mask, he_mask)) = self.waiting {
            if beam_matches(beam, vp, hp, ve_mask, he_mask) {
                self.waiting = None;
            } else {
                return None;
            }
        }

        let word = mem.read_word(self.pc).unwrap_or(0);
        self.pc = self.pc.wrapping_add(2);

        match self.fetch {
            FetchState::First => {
                self.fetch = FetchState::Second { first: word };
                None
            }
            FetchState::Second { first } => {
                self.fetch = FetchState::First;
                let skip_this = std::mem::take(&mut self.skip_next);
                match decode(first, word) {
                    Instruction::Move { reg, value } => {
                        if skip_this {
                            return None;
                        }
                        if reg < DANGEROUS_BOUNDARY && !self.danger {
                            return None;
                        }
                        Some(CopperWrite { reg, value })
                    }
                    Instruction::Wait { vp, hp, ve_mask, he_mask, .. } => {
                        if !beam_matches(beam, vp, hp, ve_mask, he_mask) {
                            self.waiting = Some((vp, hp, ve_mask, he_mask));
                        }
                        None
                    }
                    Instruction::Skip { vp, hp, ve_mask, he_mask, .. } => {
                        if beam_matches(beam, vp, hp, ve_mask, he_mask) {
                            self.skip_next = true;
                        }
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_with(words: &[u16]) -> MemoryMap {
        let mut mem = MemoryMap::new(128 * 1024, vec![0; 16]);
        for (i, w) in words.iter().enumerate() {
            mem.write_word(i as u32 * 2, *w).unwrap();
        }
        mem
    }

    #[test]
    fn move_instruction_emits_write_on_second_fetch() {
        let mem = mem_with(&[0x0100, 0xbeef]);
        let mut copper = Copper::new();
        copper.jump(0);
        let beam = Beam::new();
        assert_eq!(copper.step(&mem, &beam), None);
        assert_eq!(copper.step(&mem, &beam), Some(CopperWrite { reg: 0x100, value: 0xbeef }));
    }

    #[test]
    fn dangerous_move_is_suppressed_without_danger_bit() {
        let mem = mem_with(&[0x0020, 0x1234]);
        let mut copper = Copper::new();
        copper.jump(0);
        let beam = Beam::new();
        copper.step(&mem, &beam);
        assert_eq!(copper.step(&mem, &beam), None);
    }

    #[test]
    fn dangerous_move_applies_with_danger_bit_set() {
        let mem = mem_with(&[0x0020, 0x1234]);
        let mut copper = Copper::new();
        copper.set_danger(true);
        copper.jump(0);
        let beam = Beam::new();
        copper.step(&mem, &beam);
        assert_eq!(copper.step(&mem, &beam), Some(CopperWrite { reg: 0x20, value: 0x1234 }));
    }

    #[test]
    fn wait_parks_until_beam_position_is_reached() {
        let mem = mem_with(&[0x6401, 0xfffe]); // WAIT vp=0x64 hp=0
        let mut copper = Copper::new();
        copper.jump(0);
        let mut beam = Beam::new();
        copper.step(&mem, &beam);
        copper.step(&mem, &beam);
        assert!(copper.is_waiting(&beam));
        beam.v = 0x64;
        assert!(!copper.is_waiting(&beam));
    }

    #[test]
    fn snapshot_round_trip_restores_a_parked_wait() {
        let mem = mem_with(&[0x6401, 0xfffe]); // WAIT vp=0x64 hp=0
        let mut copper = Copper::new();
        copper.jump(0);
        let beam = Beam::new();
        copper.step(&mem, &beam);
        copper.step(&mem, &beam);
        assert!(copper.is_waiting(&beam));

        let bytes = copper.snapshot_bytes();
        let mut restored = Copper::new();
        restored.restore_bytes(&bytes).unwrap();
        assert!(restored.is_waiting(&beam));
    }

    #[test]
    fn skip_suppresses_the_following_move_when_condition_is_met() {
        let mem = mem_with(&[0x0001, 0xfffe, 0x0100, 0x5555]);
        let mut copper = Copper::new();
        copper.jump(0);
        let beam = Beam::new();
        copper.step(&mem, &beam); // skip word 1
        copper.step(&mem, &beam); // skip word 2, condition true at (0,0)
        copper.step(&mem, &beam); // move word 1
        assert_eq!(copper.step(&mem, &beam), None, "move after satisfied skip is suppressed");
    }
}
