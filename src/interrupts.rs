//! Paula-side interrupt controller: INTREQ/INTENA masks and IPL derivation.
//!
//! Sixteen interrupt sources share six CPU priority levels (several sources
//! alias onto the same level and are disambiguated only by which bit is
//! set in INTREQ, not by distinct autovectors). `Ipl::derive` mirrors the
//! fixed priority table Paula uses to turn a masked-and-enabled INTREQ into
//! the three-bit level the CPU's IPL2-0 lines present each cycle.

/// Bit position of each interrupt source within INTREQ/INTENA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Source {
    Tbe = 0,
    Dskblk = 1,
    Soft = 2,
    Ports = 3,
    Coper = 4,
    Vertb = 5,
    Blit = 6,
    Aud0 = 7,
    Aud1 = 8,
    Aud2 = 9,
    Aud3 = 10,
    Rbf = 11,
    Dsksyn = 12,
    Exter = 13,
    /// Bit 14, the master-enable bit within INTENA only (not a real source).
    Inten = 14,
}

/// Fixed CPU priority level (1-6) each source raises when pending and
/// enabled. Two or more sources at the same level present identical IPL
/// lines; software disambiguates via INTREQ.
const LEVEL_TABLE: [u8; 14] = [
    1, // Tbe
    1, // Dskblk
    1, // Soft
    2, // Ports
    3, // Coper
    3, // Vertb
    3, // Blit
    4, // Aud0
    4, // Aud1
    4, // Aud2
    4, // Aud3
    5, // Rbf
    5, // Dsksyn
    6, // Exter
];

const INTENA_MASTER: u16 = 1 << 14;

/// The 16-bit request/enable register pair and IPL derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptController {
    intreq: u16,
    intena: u16,
}

impl InterruptController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn intreq(&self) -> u16 {
        self.intreq
    }

    #[must_use]
    pub fn intena(&self) -> u16 {
        self.intena
    }

    /// Raise a source's request bit (hardware-side: disk block done, Copper
    /// interrupt waitpoint hit, Blitter finished, etc).
    pub fn raise(&mut self, source: Source) {
        self.intreq |= 1 << (source as u8);
    }

    /// Apply a SET/CLR-style write to INTREQ (bit 15 set = set the given
    /// bits, clear = clear them), as the CPU or Copper performs it.
    pub fn write_intreq(&mut self, value: u16) {
        apply_set_clr(&mut self.intreq, value);
        // Bit 14 of INTREQ has no request meaning; keep it clear.
        self.intreq &= !INTENA_MASTER;
    }

    pub fn write_intena(&mut self, value: u16) {
        apply_set_clr(&mut self.intena, value);
    }

    fn master_enabled(&self) -> bool {
        self.intena & INTENA_MASTER != 0
    }

    /// Level (0-6) the CPU's IPL lines should present: the highest priority
    /// level among sources that are both pending and individually enabled,
    /// or 0 if the master enable bit is clear or nothing qualifies.
    #[must_use]
    pub fn ipl(&self) -> u8 {
        if !self.master_enabled() {
            return 0;
        }
        let active = self.intreq & self.intena & !INTENA_MASTER;
        let mut level = 0u8;
        for bit in 0..14u8 {
            if active & (1 << bit) != 0 {
                level = level.max(LEVEL_TABLE[bit as usize]);
            }
        }
        level
    }

    /// Acknowledge (clear) a source's request bit, as the CPU's interrupt
    /// vector fetch would when levels are edge-triggered for that source.
    pub fn acknowledge(&mut self, source: Source) {
        self.intreq &= !(1 << (source as u8));
    }

    /// Pack state for snapshotting.
    #[must_use]
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.extend_from_slice(&self.intreq.to_le_bytes());
        buf.extend_from_slice(&self.intena.to_le_bytes());
        buf
    }

    /// Restore the raw request/enable registers packed by
    /// [`Self::snapshot_bytes`], bypassing the SET/CLR write semantics.
    pub fn restore_bytes(&mut self, bytes: &[u8]) -> Option<()> {
        let mut cursor = crate::bytes::ByteCursor::new(bytes);
        self.intreq = cursor.take_u16()?;
        self.intena = cursor.take_u16()?;
        Some(())
    }
}

fn apply_set_clr(reg: &mut u16, value: u16) {
    let bits = value & 0x7fff;
    if value & 0x8000 != 0 {
        *reg |= bits;
    } else {
        *reg &= !bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipl_is_zero_without_master_enable() {
        let mut ctl = InterruptController::new();
        ctl.raise(Source::Vertb);
        ctl.write_intena(0x8000 | (1 << Source::Vertb as u16));
        // Master enable (bit 14) never set.
        assert_eq!(ctl.ipl(), 0);
    }

    #[test]
    fn ipl_reflects_highest_pending_enabled_level() {
        let mut ctl = InterruptController::new();
        ctl.write_intena(0x8000 | INTENA_MASTER | (1 << Source::Vertb as u16) | (1 << Source::Exter as u16));
        ctl.raise(Source::Vertb);
        ctl.raise(Source::Exter);
        assert_eq!(ctl.ipl(), 6);
    }

    #[test]
    fn disabled_source_does_not_raise_ipl() {
        let mut ctl = InterruptController::new();
        ctl.write_intena(0x8000 | INTENA_MASTER);
        ctl.raise(Source::Blit);
        assert_eq!(ctl.ipl(), 0);
    }

    #[test]
    fn clr_write_clears_only_named_bits() {
        let mut ctl = InterruptController::new();
        ctl.write_intreq(0x8000 | (1 << Source::Tbe as u16) | (1 << Source::Soft as u16));
        ctl.write_intreq(1 << Source::Tbe as u16); // clear (bit 15 = 0)
        assert_eq!(ctl.intreq() & (1 << Source::Tbe as u16), 0);
        assert_ne!(ctl.intreq() & (1 << Source::Soft as u16), 0);
    }

    #[test]
    fn snapshot_round_trip_restores_raw_registers() {
        let mut ctl = InterruptController::new();
        ctl.write_intena(0x8000 | INTENA_MASTER | (1 << Source::Blit as u16));
        ctl.raise(Source::Blit);
        let bytes = ctl.snapshot_bytes();
        let mut restored = InterruptController::new();
        restored.restore_bytes(&bytes).unwrap();
        assert_eq!(restored.intreq(), ctl.intreq());
        assert_eq!(restored.intena(), ctl.intena());
    }

    #[test]
    fn acknowledge_clears_single_source() {
        let mut ctl = InterruptController::new();
        ctl.raise(Source::Coper);
        ctl.acknowledge(Source::Coper);
        assert_eq!(ctl.intreq(), 0);
    }
}
