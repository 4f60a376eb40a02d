//! Exception entry: stack frame push, vector fetch, PC/SR reload.

use super::bus::CpuBus;
use super::fault::CpuFault;
use super::state::{Registers, SR_SUPERVISOR, SR_TRACE};

/// Enter the exception named by `fault`. Pushes the format-0 frame (old
/// SR, return PC) onto the supervisor stack, switches to supervisor mode,
/// clears the trace bit, and reloads PC from the vector table.
///
/// Group-0 faults (address/bus error) get an extended frame: a special
/// status word, the faulting access address, and the faulting instruction
/// register, pushed below the format-0 fields. `has_vbr` gates whether the
/// vector is fetched relative to `regs.vbr` (68010+) or from address 0
/// (plain 68000, no VBR).
///
/// A second group-0 fault raised while entering a *first* pending group-0
/// fault is the double-fault condition; the caller detects that by passing
/// `already_entering_group0 = true` and receives `CpuFault::DoubleFault`
/// back instead of a successful entry.
pub fn enter(
    fault: CpuFault,
    regs: &mut Registers,
    bus: &mut dyn CpuBus,
    already_entering_group0: bool,
    has_vbr: bool,
) -> Result<(), CpuFault> {
    if fault.is_group0() && already_entering_group0 {
        return Err(CpuFault::DoubleFault { vector: fault.vector() });
    }

    let old_sr = regs.sr;
    regs.enter_supervisor();
    regs.sr &= !SR_TRACE;

    regs.a[7] = regs.a[7].wrapping_sub(4);
    let return_pc = regs.pc;
    // Bus errors while pushing the frame itself would re-enter this
    // function with a fresh AddressError; not modeled as a third level.
    let _ = bus.write_long(regs.a[7], return_pc);
    regs.a[7] = regs.a[7].wrapping_sub(2);
    let _ = bus.write_word(regs.a[7], old_sr);

    if let CpuFault::AddressError { address, write, ird } = fault {
        regs.a[7] = regs.a[7].wrapping_sub(2);
        let _ = bus.write_word(regs.a[7], ird);
        regs.a[7] = regs.a[7].wrapping_sub(4);
        let _ = bus.write_long(regs.a[7], address);
        regs.a[7] = regs.a[7].wrapping_sub(2);
        // Bit 4 set for a faulting read, clear for a faulting write.
        let ssw: u16 = if write { 0 } else { 1 << 4 };
        let _ = bus.write_word(regs.a[7], ssw);
    }

    let vbr = if has_vbr { regs.vbr } else { 0 };
    let vector_addr = vbr.wrapping_add(u32::from(fault.vector()) * 4);
    let entry = bus.read_long(vector_addr).unwrap_or(0);
    regs.pc = entry;
    Ok(())
}

/// Return from exception: pop SR then PC, in that order (reverse of push).
pub fn rte(regs: &mut Registers, bus: &mut dyn CpuBus) -> Result<(), CpuFault> {
    let sr = bus
        .read_word(regs.a[7])
        .map_err(|_| CpuFault::AddressError { address: regs.a[7], write: false, ird: 0 })?;
    regs.a[7] = regs.a[7].wrapping_add(2);
    let pc = bus
        .read_long(regs.a[7])
        .map_err(|_| CpuFault::AddressError { address: regs.a[7], write: false, ird: 0 })?;
    regs.a[7] = regs.a[7].wrapping_add(4);
    let was_supervisor = regs.supervisor();
    regs.sr = sr;
    if was_supervisor && !regs.supervisor() {
        regs.leave_supervisor();
    } else if !was_supervisor && regs.supervisor() {
        regs.enter_supervisor();
    }
    regs.pc = pc;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMap;

    #[test]
    fn enter_pushes_frame_and_loads_vector() {
        let mut regs = Registers::default();
        regs.a[7] = 0x2000;
        regs.pc = 0x1000;
        regs.ssp = 0x2000;
        let mut mem = MemoryMap::new(64 * 1024, vec![0; 4]);
        mem.write_long(5 * 4, 0x3000).unwrap();
        enter(CpuFault::DivideByZero, &mut regs, &mut mem, false, false).unwrap();
        assert_eq!(regs.pc, 0x3000);
        assert_eq!(regs.a[7], 0x2000 - 6);
        assert!(regs.supervisor());
    }

    #[test]
    fn second_group0_fault_while_entering_one_is_a_double_fault() {
        let mut regs = Registers::default();
        let mut mem = MemoryMap::new(64 * 1024, vec![0; 4]);
        let err = enter(
            CpuFault::AddressError { address: 1, write: false, ird: 0 },
            &mut regs,
            &mut mem,
            true,
            false,
        );
        assert_eq!(err, Err(CpuFault::DoubleFault { vector: 3 }));
    }

    #[test]
    fn rte_restores_pc_and_sr_pushed_by_enter() {
        let mut regs = Registers::default();
        regs.a[7] = 0x2000;
        regs.pc = 0x1000;
        regs.ssp = 0x2000;
        let mut mem = MemoryMap::new(64 * 1024, vec![0; 4]);
        mem.write_long(5 * 4, 0x3000).unwrap();
        enter(CpuFault::DivideByZero, &mut regs, &mut mem, false, false).unwrap();
        rte(&mut regs, &mut mem).unwrap();
        assert_eq!(regs.pc, 0x1000);
    }

    #[test]
    fn group0_fault_pushes_extended_frame_with_fault_address_and_ird() {
        let mut regs = Registers::default();
        regs.a[7] = 0x3000;
        regs.pc = 0x1000;
        regs.ssp = 0x3000;
        let mut mem = MemoryMap::new(64 * 1024, vec![0; 4]);
        mem.write_long(3 * 4, 0x4000).unwrap();
        enter(
            CpuFault::AddressError { address: 0x1001, write: true, ird: 0x31c0 },
            &mut regs,
            &mut mem,
            false,
            false,
        )
        .unwrap();
        assert_eq!(regs.pc, 0x4000);
        let ssw = mem.read_word(regs.a[7]).unwrap();
        assert_eq!(ssw, 0, "a faulting write clears the read bit");
        let access_addr = mem.read_long(regs.a[7] + 2).unwrap();
        assert_eq!(access_addr, 0x1001);
        let ird = mem.read_word(regs.a[7] + 6).unwrap();
        assert_eq!(ird, 0x31c0);
    }

    #[test]
    fn vbr_relocates_vector_fetch_when_the_model_has_one() {
        let mut regs = Registers::default();
        regs.a[7] = 0x2000;
        regs.pc = 0x1000;
        regs.ssp = 0x2000;
        regs.vbr = 0x8000;
        let mut mem = MemoryMap::new(64 * 1024, vec![0; 4]);
        mem.write_long(0x8000 + 5 * 4, 0x9000).unwrap();
        enter(CpuFault::DivideByZero, &mut regs, &mut mem, false, true).unwrap();
        assert_eq!(regs.pc, 0x9000);
    }

    #[test]
    fn vbr_is_ignored_on_a_model_without_one() {
        let mut regs = Registers::default();
        regs.a[7] = 0x2000;
        regs.pc = 0x1000;
        regs.ssp = 0x2000;
        regs.vbr = 0x8000;
        let mut mem = MemoryMap::new(64 * 1024, vec![0; 4]);
        mem.write_long(5 * 4, 0x3000).unwrap();
        enter(CpuFault::DivideByZero, &mut regs, &mut mem, false, false).unwrap();
        assert_eq!(regs.pc, 0x3000);
    }
}
