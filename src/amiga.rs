//! Top-level facade tying the CPU, Agnus DMA arbiter, Copper, Blitter,
//! register file, memory map, and interrupt controller into one
//! cycle-stepped machine.
//!
//! The outer loop advances one DMA cycle (8 master cycles) at a time: each
//! cycle is arbitrated exactly once, the winning client is serviced, the
//! beam advances, and the master clock used by [`scheduler::Scheduler`]
//! moves forward by 8. The CPU is allowed to retire one whole instruction
//! on a cycle it is granted the bus rather than being sub-divided into its
//! own four-master-cycle steps within that grant; see `DESIGN.md` for why
//! that coarser join is an acceptable scope simplification here.
//!
//! Register writes from the Copper and the CPU both land through
//! [`Amiga::apply_register_write`]: the Copper calls it directly from its
//! granted cycle, and the CPU reaches it indirectly through [`AmigaBus`],
//! the `CpuBus` adapter that intercepts Custom-page accesses and redirects
//! them into the register file's side-effect dispatch instead of letting
//! them fall through to the `MemoryMap`'s raw Custom-page backing.

use crate::beam::{Beam, BusOwner, BusOwnerVector};
use crate::blitter::{Blitter, BlitterRegs};
use crate::bytes::ByteCursor;
use crate::config::CoreConfig;
use crate::copper::Copper;
use crate::cpu::bus::CpuBus;
use crate::cpu::Cpu;
use crate::debug::Debugger;
use crate::dma::{self, Arbiter, DmaInputs, DmaPointers};
use crate::error::{CoreError, CoreResult, SnapshotMismatchReason};
use crate::interrupts::{InterruptController, Source};
use crate::memory::{AccessFault, MemoryMap, PageTag};
use crate::regs::{Accessor, RegisterFile};
use crate::scheduler::{Scheduler, Slot};
use crate::snapshot::{read_snapshot, write_snapshot, ComponentBlob};

/// Custom register offsets this facade gives hard-wired side effects to,
/// since their effects span multiple components rather than living in the
/// flat register file alone.
mod offset {
    pub const DMACON: u16 = 0x096;
    pub const INTENA: u16 = 0x09a;
    pub const INTREQ: u16 = 0x09c;
    pub const COP1LCH: u16 = 0x080;
    pub const COP1LCL: u16 = 0x082;
    pub const COPJMP1: u16 = 0x088;
    pub const BLTSIZE: u16 = 0x058;
    pub const COPCON: u16 = 0x02e;
    pub const BLTCON0: u16 = 0x040;
    pub const BLTCON1: u16 = 0x042;
    pub const BLTAFWM: u16 = 0x044;
    pub const BLTALWM: u16 = 0x046;
    pub const BLTCPTH: u16 = 0x048;
    pub const BLTCPTL: u16 = 0x04a;
    pub const BLTBPTH: u16 = 0x04c;
    pub const BLTBPTL: u16 = 0x04e;
    pub const BLTAPTH: u16 = 0x050;
    pub const BLTAPTL: u16 = 0x052;
    pub const BLTDPTH: u16 = 0x054;
    pub const BLTDPTL: u16 = 0x056;
    pub const BLTCMOD: u16 = 0x060;
    pub const BLTBMOD: u16 = 0x062;
    pub const BLTAMOD: u16 = 0x064;
    pub const BLTDMOD: u16 = 0x066;
}

/// First address of the 64 KiB Custom chipset register page.
const CUSTOM_BASE: u32 = 0x00df_0000;

/// Why [`Amiga::tick_cck`] (and therefore [`Amiga::run_frames`]) returned
/// before the cycle it was asked to run could be fully accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The CPU was about to fetch an instruction at a breakpointed address;
    /// the instruction has not executed.
    Breakpoint(u32),
    /// A watched address was read or written by the CPU; the access already
    /// happened.
    Watchpoint(u32),
    /// The beam reached a trapped `(v, h)` position.
    Beamtrap(u16, u16),
}

pub struct Amiga {
    pub cpu: Cpu,
    pub mem: MemoryMap,
    pub regs: RegisterFile,
    pub beam: Beam,
    pub bus_owners: BusOwnerVector,
    pub pointers: DmaPointers,
    arbiter: Arbiter,
    pub copper: Copper,
    pub blitter: Blitter,
    pub interrupts: InterruptController,
    pub scheduler: Scheduler,
    pub debugger: Debugger,
    pub config: CoreConfig,
    dmacon: u16,
    cop1lc: u32,
    /// Set by [`AmigaBus`] when a CPU access matches an enabled watchpoint;
    /// consumed by `tick_cck` right after the CPU step that set it.
    pending_stop: Option<StopReason>,
}

impl Amiga {
    #[must_use]
    pub fn new(config: CoreConfig, chip_ram_size: usize, rom: Vec<u8>) -> Self {
        let mut mem = MemoryMap::new(chip_ram_size, rom);
        let mut cpu = Cpu::with_model(config.cpu_model);
        cpu.reset(&mut mem);
        let width = Beam::new().ccks_this_line(config.region) as usize + 1;
        Self {
            cpu,
            mem,
            regs: RegisterFile::new(),
            beam: Beam::new(),
            bus_owners: BusOwnerVector::new(width),
            pointers: DmaPointers::default(),
            arbiter: Arbiter::new(),
            copper: Copper::new(),
            blitter: Blitter::new(),
            interrupts: InterruptController::new(),
            scheduler: Scheduler::new(),
            debugger: Debugger::new(),
            config,
            dmacon: 0,
            cop1lc: 0,
            pending_stop: None,
        }
    }

    /// Advance by one DMA cycle (one "CCK", 8 master cycles). Returns why
    /// the cycle was cut short if a debug guard fired; the cycle it
    /// returned early on has not been consumed and is retried on the next
    /// call once the caller resumes.
    pub fn tick_cck(&mut self) -> Option<StopReason> {
        if self.beam.h == 0 {
            self.bus_owners.reset_line();
        }

        if self.config.guards.beamtraps
            && self.debugger.beamtraps.matches(Debugger::beam_key(self.beam.v, self.beam.h))
        {
            return Some(StopReason::Beamtrap(self.beam.v, self.beam.h));
        }

        let inputs = DmaInputs {
            dmacon: self.dmacon,
            bplcon0: self.regs.read(0x100),
            ddfstrt: self.regs.read(0x092),
            ddfstop: self.regs.read(0x094),
            blitter_busy: self.blitter.busy(),
        };
        let grant = self.arbiter.arbitrate(&self.beam, inputs);
        self.bus_owners.set(self.beam.h, grant.owner);

        match grant.owner {
            BusOwner::Bitplane(plane) => {
                let pointer = &mut self.pointers.bitplane[plane as usize];
                dma::service_fetch(&self.mem, pointer);
            }
            BusOwner::Audio(ch) => {
                let pointer = &mut self.pointers.audio[ch as usize];
                dma::service_fetch(&self.mem, pointer);
            }
            BusOwner::Sprite(ch) => {
                let pointer = &mut self.pointers.sprite[ch as usize];
                dma::service_fetch(&self.mem, pointer);
            }
            BusOwner::Disk => {
                let pointer = &mut self.pointers.disk;
                dma::service_fetch(&self.mem, pointer);
            }
            BusOwner::Cpu => {
                if self.config.guards.breakpoints
                    && self.debugger.breakpoints.matches(self.cpu.regs.pc)
                {
                    return Some(StopReason::Breakpoint(self.cpu.regs.pc));
                }
                let mut cpu = std::mem::take(&mut self.cpu);
                let ipl = self.interrupts.ipl();
                cpu.step(&mut AmigaBus { amiga: self }, ipl);
                self.cpu = cpu;
                if let Some(stop) = self.pending_stop.take() {
                    return Some(stop);
                }
            }
            BusOwner::Refresh
            | BusOwner::None
            | BusOwner::Blocked
            | BusOwner::Copper
            | BusOwner::Blitter => {}
        }

        let cycle = self.scheduler.current_cycle();
        self.scheduler.schedule_abs(Slot::Reg, cycle, 0, 0);
        if grant.owner == BusOwner::Copper {
            self.scheduler.schedule_abs(Slot::Copper, cycle, 0, 0);
        }
        if grant.blitter_progress {
            self.scheduler.schedule_abs(Slot::Blitter, cycle, 0, 0);
        }
        if self.beam.is_vblank_start() {
            self.scheduler.schedule_abs(Slot::Vbl, cycle, 0, 0);
        }

        let mut scheduler = std::mem::take(&mut self.scheduler);
        scheduler.dispatch(cycle, |_sched, fired| match fired.slot {
            Slot::Reg => {
                self.regs.drain_due(fired.cycle);
            }
            Slot::Copper => {
                self.copper.set_danger(self.regs.read(offset::COPCON) & 0x0002 != 0);
                if let Some(write) = self.copper.step(&self.mem, &self.beam) {
                    self.apply_register_write(write.reg, write.value, Accessor::Copper, fired.cycle);
                }
            }
            Slot::Blitter => {
                if self.blitter.step(&mut self.mem) {
                    self.interrupts.raise(Source::Blit);
                }
            }
            Slot::Vbl => {
                self.interrupts.raise(Source::Vertb);
                self.copper.jump(self.cop1lc);
            }
            _ => {}
        });
        self.scheduler = scheduler;

        self.beam.advance(self.config.region);
        self.scheduler.advance_to(cycle + 8);
        None
    }

    /// Run whole frames, stopping once `frames` vertical-blank boundaries
    /// have been crossed, or early if a debug guard fires.
    pub fn run_frames(&mut self, frames: u32) -> Option<StopReason> {
        let mut seen = 0;
        while seen < frames {
            if let Some(stop) = self.tick_cck() {
                return Some(stop);
            }
            if self.beam.is_vblank_start() {
                seen += 1;
            }
        }
        None
    }

    /// Apply a register write, including the handful of side effects that
    /// span components (DMACON enabling channels, INTENA/INTREQ routing to
    /// the interrupt controller, COP1LC/COPJMP1 restarting the Copper,
    /// BLTSIZE latching and starting a blit).
    fn apply_register_write(&mut self, reg: u16, value: u16, accessor: Accessor, trigger: u64) {
        match reg {
            offset::DMACON => {
                if value & 0x8000 != 0 {
                    self.dmacon |= value & 0x7fff;
                } else {
                    self.dmacon &= !(value & 0x7fff);
                }
            }
            offset::INTENA => self.interrupts.write_intena(value),
            offset::INTREQ => self.interrupts.write_intreq(value),
            offset::COP1LCH => self.cop1lc = (self.cop1lc & 0x0000_ffff) | (u32::from(value) << 16),
            offset::COP1LCL => self.cop1lc = (self.cop1lc & 0xffff_0000) | u32::from(value),
            offset::COPJMP1 => self.copper.jump(self.cop1lc),
            offset::BLTSIZE => self.start_blit(value),
            _ => {}
        }
        self.regs.queue_write(reg, value, accessor, trigger);
    }

    fn read_ptr(&self, hi: u16, lo: u16) -> u32 {
        (u32::from(self.regs.read(hi)) << 16) | u32::from(self.regs.read(lo))
    }

    fn start_blit(&mut self, bltsize: u16) {
        let regs = BlitterRegs {
            bltcon0: self.regs.read(offset::BLTCON0),
            bltcon1: self.regs.read(offset::BLTCON1),
            bltafwm: self.regs.read(offset::BLTAFWM),
            bltalwm: self.regs.read(offset::BLTALWM),
            bltapt: self.read_ptr(offset::BLTAPTH, offset::BLTAPTL),
            bltbpt: self.read_ptr(offset::BLTBPTH, offset::BLTBPTL),
            bltcpt: self.read_ptr(offset::BLTCPTH, offset::BLTCPTL),
            bltdpt: self.read_ptr(offset::BLTDPTH, offset::BLTDPTL),
            bltamod: self.regs.read(offset::BLTAMOD) as i16,
            bltbmod: self.regs.read(offset::BLTBMOD) as i16,
            bltcmod: self.regs.read(offset::BLTCMOD) as i16,
            bltdmod: self.regs.read(offset::BLTDMOD) as i16,
            width_words: bltsize & 0x3f,
            height: (bltsize >> 6) & 0x3ff,
        };
        self.blitter.start(regs);
    }

    /// Serialize the whole machine into a snapshot stream, in the
    /// dependency order `read_snapshot` will restore: memory and the
    /// register file first, then the beam and coprocessors that reference
    /// them.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mem_bytes = self.mem.chip_ram().to_vec();
        let regs_bytes = self.regs.snapshot_bytes();
        let mut beam_bytes = Vec::with_capacity(5);
        beam_bytes.extend_from_slice(&self.beam.v.to_le_bytes());
        beam_bytes.extend_from_slice(&self.beam.h.to_le_bytes());
        beam_bytes.push(u8::from(self.beam.long_line));
        let cpu_bytes = self.cpu.snapshot_bytes();
        let copper_bytes = self.copper.snapshot_bytes();
        let blitter_bytes = self.blitter.snapshot_bytes();
        let interrupts_bytes = self.interrupts.snapshot_bytes();
        let mut misc_bytes = Vec::with_capacity(6);
        misc_bytes.extend_from_slice(&self.dmacon.to_le_bytes());
        misc_bytes.extend_from_slice(&self.cop1lc.to_le_bytes());

        write_snapshot(&[
            ComponentBlob { name: "mem", bytes: &mem_bytes },
            ComponentBlob { name: "regs", bytes: &regs_bytes },
            ComponentBlob { name: "beam", bytes: &beam_bytes },
            ComponentBlob { name: "cpu", bytes: &cpu_bytes },
            ComponentBlob { name: "copper", bytes: &copper_bytes },
            ComponentBlob { name: "blitter", bytes: &blitter_bytes },
            ComponentBlob { name: "interrupts", bytes: &interrupts_bytes },
            ComponentBlob { name: "misc", bytes: &misc_bytes },
        ])
    }

    /// Restore a snapshot produced by [`Self::serialize`]. The DMA
    /// arbiter's BLS yield streak and the scheduler's pending events are
    /// not part of the snapshot: both are transient, sub-cycle bookkeeping
    /// that the next `tick_cck` call rebuilds on its own.
    pub fn restore(&mut self, stream: &[u8]) -> CoreResult<()> {
        let corrupted =
            || CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::Corrupted };
        for (name, bytes) in read_snapshot(stream)? {
            match name.as_str() {
                "mem" => self.mem.load_chip_ram(&bytes),
                "regs" => self.regs.restore_bytes(&bytes),
                "beam" => {
                    let mut cursor = ByteCursor::new(&bytes);
                    self.beam.v = cursor.take_u16().ok_or_else(corrupted)?;
                    self.beam.h = cursor.take_u16().ok_or_else(corrupted)?;
                    self.beam.long_line = cursor.take_bool().ok_or_else(corrupted)?;
                }
                "cpu" => self.cpu.restore_bytes(&bytes).ok_or_else(corrupted)?,
                "copper" => self.copper.restore_bytes(&bytes).ok_or_else(corrupted)?,
                "blitter" => self.blitter.restore_bytes(&bytes).ok_or_else(corrupted)?,
                "interrupts" => self.interrupts.restore_bytes(&bytes).ok_or_else(corrupted)?,
                "misc" => {
                    let mut cursor = ByteCursor::new(&bytes);
                    self.dmacon = cursor.take_u16().ok_or_else(corrupted)?;
                    self.cop1lc = cursor.take_u32().ok_or_else(corrupted)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The `CpuBus` the CPU core runs against: ordinary addresses pass through
/// to `mem` unchanged, but an access landing in the Custom chipset
/// register page is redirected into the register file's side-effect
/// dispatch instead of `mem`'s raw (and otherwise-unread) Custom-page
/// backing, and checked against any enabled watchpoint.
struct AmigaBus<'a> {
    amiga: &'a mut Amiga,
}

impl AmigaBus<'_> {
    fn check_watchpoint(&mut self, address: u32) {
        if self.amiga.config.guards.watchpoints && self.amiga.debugger.watchpoints.matches(address)
        {
            self.amiga.pending_stop.get_or_insert(StopReason::Watchpoint(address));
        }
    }
}

impl CpuBus for AmigaBus<'_> {
    fn read_byte(&mut self, address: u32) -> u8 {
        self.check_watchpoint(address);
        if self.amiga.mem.tag_at(address) == PageTag::Custom {
            let reg_offset = (address.wrapping_sub(CUSTOM_BASE) & 0xffff) as u16;
            let word = self.amiga.regs.read(reg_offset & !1);
            return if reg_offset & 1 == 0 { (word >> 8) as u8 } else { word as u8 };
        }
        self.amiga.mem.read_byte(address)
    }

    fn read_word(&mut self, address: u32) -> Result<u16, AccessFault> {
        self.check_watchpoint(address);
        if address & 1 != 0 {
            return Err(AccessFault::AddressError { address });
        }
        if self.amiga.mem.tag_at(address) == PageTag::Custom {
            let reg_offset = (address.wrapping_sub(CUSTOM_BASE) & 0xffff) as u16;
            return Ok(self.amiga.regs.read(reg_offset));
        }
        self.amiga.mem.read_word(address)
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        self.check_watchpoint(address);
        if self.amiga.mem.tag_at(address) == PageTag::Custom {
            let reg_offset = (address.wrapping_sub(CUSTOM_BASE) & 0xffff) as u16;
            let aligned = reg_offset & !1;
            let current = self.amiga.regs.read(aligned);
            let merged = if reg_offset & 1 == 0 {
                (current & 0x00ff) | (u16::from(value) << 8)
            } else {
                (current & 0xff00) | u16::from(value)
            };
            let trigger = self.amiga.scheduler.current_cycle();
            self.amiga.apply_register_write(aligned, merged, Accessor::Cpu, trigger);
            return;
        }
        self.amiga.mem.write_byte(address, value);
    }

    fn write_word(&mut self, address: u32, value: u16) -> Result<(), AccessFault> {
        self.check_watchpoint(address);
        if address & 1 != 0 {
            return Err(AccessFault::AddressError { address });
        }
        if self.amiga.mem.tag_at(address) == PageTag::Custom {
            let reg_offset = (address.wrapping_sub(CUSTOM_BASE) & 0xffff) as u16;
            let trigger = self.amiga.scheduler.current_cycle();
            self.amiga.apply_register_write(reg_offset, value, Accessor::Cpu, trigger);
            return Ok(());
        }
        self.amiga.mem.write_word(address, value)
    }
}
