//! Page-indexed address-decoding memory map.
//!
//! The 24-bit (68000) or 32-bit (68010+/EC020) address space is carved into
//! fixed 64 KiB pages, each tagged with what backs it. Decoding a CPU or
//! DMA access is then a shift-and-index into a flat page table rather than
//! a chain of range comparisons, the same trick the original firmware's MMU
//! shadowing relies on (autoconfig can retag a page at runtime without the
//! decoder itself changing).

use crate::error::{CoreError, CoreResult};

const PAGE_SHIFT: u32 = 16;
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
const PAGE_COUNT: usize = 1 << (32 - PAGE_SHIFT);

/// What backs a given page of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTag {
    ChipRam,
    SlowRam,
    FastRam,
    Rom,
    ExtRom,
    Wom,
    CiaA,
    CiaB,
    Rtc,
    Custom,
    AutoConfig,
    Unmapped,
}

/// A contiguous backing store plus the byte offset of page 0 within it.
#[derive(Debug, Clone)]
struct Region {
    tag: PageTag,
    data: Vec<u8>,
    /// Address of the first byte of `data`, used to compute the in-region
    /// offset for an access whose page maps here.
    base: u32,
}

/// Reason a CPU or DMA access did not complete normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    /// Word/long access to an odd address.
    AddressError { address: u32 },
}

/// The address-decoding map: one tag per 64 KiB page plus the regions those
/// tags resolve into.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    pages: Vec<PageTag>,
    regions: Vec<Region>,
    custom_index: usize,
    cia_a_index: usize,
    cia_b_index: usize,
    chip_ram_index: usize,
    /// Bit pattern returned by a read from an unmapped page, matching the
    /// open-bus behavior of a floating data bus.
    unmapped_read_pattern: u16,
}

impl MemoryMap {
    /// Build a map with chip RAM of `chip_ram_size` bytes (must be a
    /// multiple of 64 KiB) and the given Kickstart ROM image.
    #[must_use]
    pub fn new(chip_ram_size: usize, rom: Vec<u8>) -> Self {
        let mut pages = vec![PageTag::Unmapped; PAGE_COUNT];
        let mut regions = Vec::new();

        let chip_ram_index = regions.len();
        regions.push(Region { tag: PageTag::ChipRam, data: vec![0; chip_ram_size], base: 0 });
        for page in 0..(chip_ram_size >> PAGE_SHIFT) {
            pages[page] = PageTag::ChipRam;
        }

        let custom_index = regions.len();
        regions.push(Region { tag: PageTag::Custom, data: vec![0; PAGE_SIZE], base: 0x00df_0000 });
        pages[0x00df_0000 >> PAGE_SHIFT] = PageTag::Custom;

        let cia_a_index = regions.len();
        regions.push(Region { tag: PageTag::CiaA, data: vec![0; PAGE_SIZE], base: 0x00bf_e000 });
        pages[0x00bf_e000 >> PAGE_SHIFT] = PageTag::CiaA;

        let cia_b_index = regions.len();
        regions.push(Region { tag: PageTag::CiaB, data: vec![0; PAGE_SIZE], base: 0x00bf_d000 });
        pages[0x00bf_d000 >> PAGE_SHIFT] = PageTag::CiaB;

        let rom_base: u32 = 0x00f8_0000;
        let rom_pages = rom.len().div_ceil(PAGE_SIZE);
        regions.push(Region { tag: PageTag::Rom, data: rom, base: rom_base });
        for page in 0..rom_pages {
            let idx = (rom_base as usize >> PAGE_SHIFT) + page;
            if idx < PAGE_COUNT {
                pages[idx] = PageTag::Rom;
            }
        }

        Self {
            pages,
            regions,
            custom_index,
            cia_a_index,
            cia_b_index,
            chip_ram_index,
            unmapped_read_pattern: 0xffff,
        }
    }

    #[must_use]
    pub fn tag_at(&self, address: u32) -> PageTag {
        self.pages[(address >> PAGE_SHIFT) as usize]
    }

    fn region_for(&self, tag: PageTag) -> Option<usize> {
        match tag {
            PageTag::ChipRam => Some(self.chip_ram_index),
            PageTag::Custom => Some(self.custom_index),
            PageTag::CiaA => Some(self.cia_a_index),
            PageTag::CiaB => Some(self.cia_b_index),
            _ => self.regions.iter().position(|r| r.tag == tag),
        }
    }

    /// Read one byte, or the open-bus pattern if the page is unmapped.
    #[must_use]
    pub fn read_byte(&self, address: u32) -> u8 {
        let tag = self.tag_at(address);
        let Some(idx) = self.region_for(tag) else {
            return self.unmapped_read_pattern as u8;
        };
        let region = &self.regions[idx];
        let offset = address.wrapping_sub(region.base) as usize;
        region.data.get(offset).copied().unwrap_or(self.unmapped_read_pattern as u8)
    }

    /// Read one big-endian word. Returns [`AccessFault::AddressError`] on an
    /// odd address, matching 68000 bus behavior for word/long accesses.
    pub fn read_word(&self, address: u32) -> Result<u16, AccessFault> {
        if address & 1 != 0 {
            return Err(AccessFault::AddressError { address });
        }
        let hi = self.read_byte(address);
        let lo = self.read_byte(address.wrapping_add(1));
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        let tag = self.tag_at(address);
        if tag == PageTag::Rom || tag == PageTag::Unmapped {
            return;
        }
        let Some(idx) = self.region_for(tag) else { return };
        let region = &mut self.regions[idx];
        let offset = address.wrapping_sub(region.base) as usize;
        if let Some(slot) = region.data.get_mut(offset) {
            *slot = value;
        }
    }

    pub fn write_word(&mut self, address: u32, value: u16) -> Result<(), AccessFault> {
        if address & 1 != 0 {
            return Err(AccessFault::AddressError { address });
        }
        let [hi, lo] = value.to_be_bytes();
        self.write_byte(address, hi);
        self.write_byte(address.wrapping_add(1), lo);
        Ok(())
    }

    /// Wrap a chip-RAM pointer at the configured chip RAM size, for the
    /// Agnus/Copper/Blitter pointer auto-increment behavior (real pointer
    /// registers only carry 20 effective bits' worth of chip addressing).
    #[must_use]
    pub fn wrap_chip_pointer(&self, address: u32) -> u32 {
        let size = self.regions[self.chip_ram_index].data.len() as u32;
        if size == 0 {
            0
        } else {
            address % size
        }
    }

    /// Raw chip RAM contents, for snapshotting.
    #[must_use]
    pub fn chip_ram(&self) -> &[u8] {
        &self.regions[self.chip_ram_index].data
    }

    /// Overwrite chip RAM from a snapshot blob, truncating or zero-padding
    /// to the map's configured size.
    pub fn load_chip_ram(&mut self, bytes: &[u8]) {
        let region = &mut self.regions[self.chip_ram_index].data;
        let n = region.len().min(bytes.len());
        region[..n].copy_from_slice(&bytes[..n]);
        region[n..].fill(0);
    }

    /// Retag a page at runtime, for autoconfig board enumeration.
    pub fn retag_page(&mut self, page_index: usize, tag: PageTag) -> CoreResult<()> {
        if page_index >= PAGE_COUNT {
            return Err(CoreError::ConfigurationConflict {
                detail: format!("page index {page_index} out of range"),
            });
        }
        self.pages[page_index] = tag;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_map() -> MemoryMap {
        MemoryMap::new(512 * 1024, vec![0xaa; 256 * 1024])
    }

    #[test]
    fn chip_ram_round_trips() {
        let mut map = small_map();
        map.write_word(0x1000, 0xbeef).unwrap();
        assert_eq!(map.read_word(0x1000).unwrap(), 0xbeef);
    }

    #[test]
    fn odd_word_access_is_an_address_error() {
        let map = small_map();
        assert_eq!(map.read_word(0x1001), Err(AccessFault::AddressError { address: 0x1001 }));
    }

    #[test]
    fn rom_writes_are_ignored() {
        let mut map = small_map();
        let before = map.read_byte(0x00f8_0000);
        map.write_byte(0x00f8_0000, 0x99);
        assert_eq!(map.read_byte(0x00f8_0000), before);
    }

    #[test]
    fn unmapped_region_reads_open_bus_pattern() {
        let map = small_map();
        assert_eq!(map.tag_at(0x00a0_0000), PageTag::Unmapped);
        assert_eq!(map.read_byte(0x00a0_0000), 0xff);
    }

    #[test]
    fn chip_pointer_wraps_at_configured_size() {
        let map = MemoryMap::new(128 * 1024, vec![0; 1024]);
        assert_eq!(map.wrap_chip_pointer(128 * 1024), 0);
        assert_eq!(map.wrap_chip_pointer(128 * 1024 + 10), 10);
    }
}
