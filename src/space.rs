//! Page-based object space backing the marker's heap lookups.
//!
//! Every page keeps an object start bitmap, so resolving an arbitrary inner
//! address to its object header is a bounds-checked page search followed by a
//! bitmap scan. Addresses inside an unretired linear allocation buffer are not
//! resolvable; [Space::reset_linear_allocation_buffers] must run before
//! conservative scanning.

use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::{
    age_table::{Age, AgeTable},
    header::{HeapObjectHeader, ALLOCATION_GRANULARITY, HEADER_SIZE},
    internal::gc_info::GCInfoIndex,
};

pub const PAGE_SIZE: usize = 128 * 1024;
/// Objects above this size get a dedicated page.
pub const LARGE_OBJECT_SIZE_THRESHOLD: usize = PAGE_SIZE / 2;

pub const fn round_up(x: usize, y: usize) -> usize {
    ((x) + (y - 1)) & !(y - 1)
}

/// Size of an object with `payload` bytes, header included. `None` when it
/// does not fit the header's 32-bit size field.
pub fn checked_allocation_size(payload: usize) -> Option<usize> {
    let size = payload.checked_add(HEADER_SIZE + ALLOCATION_GRANULARITY - 1)?
        & !(ALLOCATION_GRANULARITY - 1);
    if size > u32::MAX as usize {
        return None;
    }
    Some(size)
}

const BITS_PER_WORD: usize = u64::BITS as usize;

struct ObjectStartBitmap {
    bits: Vec<u64>,
}

impl ObjectStartBitmap {
    fn new(page_size: usize) -> Self {
        let granules = page_size / ALLOCATION_GRANULARITY;
        Self {
            bits: vec![0; (granules + BITS_PER_WORD - 1) / BITS_PER_WORD],
        }
    }

    fn set(&mut self, offset: usize) {
        let granule = offset / ALLOCATION_GRANULARITY;
        self.bits[granule / BITS_PER_WORD] |= 1 << (granule % BITS_PER_WORD);
    }

    /// Offset of the closest object start at or below `offset`.
    fn find_object_start(&self, offset: usize) -> Option<usize> {
        let granule = offset / ALLOCATION_GRANULARITY;
        let mut word_index = granule / BITS_PER_WORD;
        let bit = granule % BITS_PER_WORD;
        let mut word = *self.bits.get(word_index)? & (u64::MAX >> (BITS_PER_WORD - 1 - bit));
        loop {
            if word != 0 {
                let highest = BITS_PER_WORD - 1 - word.leading_zeros() as usize;
                return Some((word_index * BITS_PER_WORD + highest) * ALLOCATION_GRANULARITY);
            }
            if word_index == 0 {
                return None;
            }
            word_index -= 1;
            word = self.bits[word_index];
        }
    }
}

pub struct Page {
    memory: MmapMut,
    /// End of memory handed out by retired linear allocation buffers.
    allocated_end: usize,
    object_starts: ObjectStartBitmap,
    age_table: AgeTable,
    large: bool,
}

impl Page {
    fn new(size: usize, large: bool) -> Option<Self> {
        let memory = match MmapMut::map_anon(size) {
            Ok(memory) => memory,
            Err(err) => {
                log::error!("failed to map {} byte page: {}", size, err);
                return None;
            }
        };
        let start = memory.as_ptr() as usize;
        Some(Self {
            memory,
            allocated_end: start,
            object_starts: ObjectStartBitmap::new(size),
            age_table: AgeTable::new(size),
            large,
        })
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start() + self.memory.len()
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub fn is_large(&self) -> bool {
        self.large
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.start() && address < self.end()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_end - self.start()
    }

    pub fn age_table(&self) -> &AgeTable {
        &self.age_table
    }

    fn object_header_from_inner_address(&self, address: usize) -> Option<&HeapObjectHeader> {
        if !self.contains(address) || address >= self.allocated_end {
            return None;
        }
        let start = self.object_starts.find_object_start(address - self.start())?;
        let header = unsafe { &*((self.start() + start) as *const HeapObjectHeader) };
        if address >= header.address() + header.get_size() {
            return None;
        }
        Some(header)
    }

    fn for_each_object(&self, mut f: impl FnMut(&HeapObjectHeader)) {
        let mut cursor = self.start();
        while cursor < self.allocated_end {
            let header = unsafe { &*(cursor as *const HeapObjectHeader) };
            debug_assert!(header.get_size() >= HEADER_SIZE);
            f(header);
            cursor += header.get_size();
        }
    }
}

#[derive(Clone, Copy)]
struct LinearAllocationBuffer {
    page_start: usize,
    top: usize,
    limit: usize,
}

pub struct Space {
    pages: Vec<Page>,
    /// `(page start, index into pages)`, sorted by start.
    page_index: Vec<(usize, usize)>,
    lab: Option<LinearAllocationBuffer>,
    allocated_bytes: usize,
}

impl Space {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            page_index: Vec::new(),
            lab: None,
            allocated_bytes: 0,
        }
    }

    /// Allocates an object of `size` payload bytes. The returned header is
    /// still in construction.
    pub fn allocate(
        &mut self,
        size: usize,
        index: GCInfoIndex,
        young: bool,
    ) -> Option<NonNull<HeapObjectHeader>> {
        let size = checked_allocation_size(size)?;
        let address = if size > LARGE_OBJECT_SIZE_THRESHOLD {
            self.allocate_large(size)?
        } else {
            self.allocate_in_lab(size)?
        };
        let header = address as *mut HeapObjectHeader;
        unsafe {
            std::ptr::write_bytes(address as *mut u8, 0, size);
            header.write(HeapObjectHeader::new(size, index, young));
        }
        let page = self.page_for_address_mut(address)?;
        let offset = address - page.start();
        page.object_starts.set(offset);
        if young {
            page.age_table.mark_young_range(offset, offset + size);
        }
        self.allocated_bytes += size;
        NonNull::new(header)
    }

    fn allocate_in_lab(&mut self, size: usize) -> Option<usize> {
        if let Some(lab) = &mut self.lab {
            if lab.limit - lab.top >= size {
                let address = lab.top;
                lab.top += size;
                return Some(address);
            }
        }
        self.refill_linear_allocation_buffer(size)?;
        self.allocate_in_lab(size)
    }

    fn refill_linear_allocation_buffer(&mut self, size: usize) -> Option<()> {
        self.reset_linear_allocation_buffers();
        let reusable = self
            .pages
            .iter()
            .rev()
            .find(|page| !page.large && page.end() - page.allocated_end >= size)
            .map(|page| (page.start(), page.allocated_end, page.end()));
        let (page_start, top, limit) = match reusable {
            Some(range) => range,
            None => {
                let page = self.add_page(PAGE_SIZE, false)?;
                (page.start(), page.allocated_end, page.end())
            }
        };
        log::trace!("new linear allocation buffer [{:#x}, {:#x})", top, limit);
        self.lab = Some(LinearAllocationBuffer {
            page_start,
            top,
            limit,
        });
        Some(())
    }

    fn allocate_large(&mut self, size: usize) -> Option<usize> {
        let page = self.add_page(round_up(size, 4096), true)?;
        let address = page.start();
        page.allocated_end = address + size;
        Some(address)
    }

    fn add_page(&mut self, size: usize, large: bool) -> Option<&mut Page> {
        let page = Page::new(size, large)?;
        let start = page.start();
        let index = self.pages.len();
        self.pages.push(page);
        let position = self.page_index.partition_point(|&(s, _)| s < start);
        self.page_index.insert(position, (start, index));
        Some(&mut self.pages[index])
    }

    /// Retires the current linear allocation buffer so that every allocated
    /// object becomes visible to inner address lookups.
    pub fn reset_linear_allocation_buffers(&mut self) {
        if let Some(lab) = self.lab.take() {
            if let Some(page) = self.page_for_address_mut(lab.page_start) {
                page.allocated_end = lab.top;
            }
        }
    }

    pub fn has_linear_allocation_buffer(&self) -> bool {
        self.lab.is_some()
    }

    pub fn page_for_address(&self, address: usize) -> Option<&Page> {
        let position = self.page_index.partition_point(|&(s, _)| s <= address);
        let (_, index) = *self.page_index.get(position.checked_sub(1)?)?;
        let page = &self.pages[index];
        if page.contains(address) {
            Some(page)
        } else {
            None
        }
    }

    fn page_for_address_mut(&mut self, address: usize) -> Option<&mut Page> {
        let position = self.page_index.partition_point(|&(s, _)| s <= address);
        let (_, index) = *self.page_index.get(position.checked_sub(1)?)?;
        let page = &mut self.pages[index];
        if page.contains(address) {
            Some(page)
        } else {
            None
        }
    }

    /// Resolves any address inside an allocated object to its header.
    pub fn object_header_from_inner_address(&self, address: usize) -> Option<&HeapObjectHeader> {
        self.page_for_address(address)?
            .object_header_from_inner_address(address)
    }

    pub fn contains(&self, address: usize) -> bool {
        self.page_for_address(address).is_some()
    }

    /// Generation of the card covering `address`; addresses outside the heap are old.
    pub fn age(&self, address: usize) -> Age {
        self.page_for_address(address)
            .map_or(Age::Old, |page| page.age_table.get_age(address - page.start()))
    }

    /// Turns `header` into an old object. Called on survivors once a cycle is done.
    pub fn promote(&mut self, header: &HeapObjectHeader) {
        header.set_young(false);
        let (address, size) = (header.address(), header.get_size());
        if let Some(page) = self.page_for_address_mut(address) {
            let offset = address - page.start();
            page.age_table.demote_range(offset, offset + size);
        }
    }

    pub fn reset_age_tables(&mut self) {
        for page in self.pages.iter_mut() {
            page.age_table.reset();
        }
    }

    /// Visits every object in retired allocation buffers.
    pub fn for_each_object(&self, mut f: impl FnMut(&HeapObjectHeader)) {
        for page in self.pages.iter() {
            page.for_each_object(&mut f);
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn committed_bytes(&self) -> usize {
        self.pages.iter().map(Page::size).sum()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }
}

impl Default for Space {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: GCInfoIndex = GCInfoIndex(1);

    #[test]
    fn inner_addresses_resolve_after_lab_reset() {
        let mut space = Space::new();
        let a = space.allocate(24, INDEX, false).unwrap();
        let b = space.allocate(40, INDEX, false).unwrap();
        let (a, b) = unsafe { (a.as_ref(), b.as_ref()) };
        let inner = b.payload() as usize + 17;

        // Still hidden by the allocation buffer.
        assert!(space.object_header_from_inner_address(inner).is_none());
        space.reset_linear_allocation_buffers();

        let found = space.object_header_from_inner_address(inner).unwrap();
        assert_eq!(found.address(), b.address());
        let found = space.object_header_from_inner_address(a.address()).unwrap();
        assert_eq!(found.address(), a.address());
        assert!(space
            .object_header_from_inner_address(b.address() + b.get_size())
            .is_none());
        assert!(space.object_header_from_inner_address(8).is_none());
    }

    #[test]
    fn large_objects_get_their_own_page() {
        let mut space = Space::new();
        let large = space
            .allocate(LARGE_OBJECT_SIZE_THRESHOLD + 1, INDEX, true)
            .unwrap();
        let large = unsafe { large.as_ref() };
        let page = space.page_for_address(large.address()).unwrap();
        assert!(page.is_large());
        let last_byte = large.address() + large.get_size() - 1;
        assert_eq!(
            space
                .object_header_from_inner_address(last_byte)
                .map(|h| h.address()),
            Some(large.address())
        );
        assert_eq!(space.age(large.address()), Age::Young);
    }

    #[test]
    fn allocation_continues_in_partially_used_page() {
        let mut space = Space::new();
        space.allocate(16, INDEX, false).unwrap();
        space.reset_linear_allocation_buffers();
        space.allocate(16, INDEX, false).unwrap();
        space.reset_linear_allocation_buffers();
        assert_eq!(space.pages().len(), 1);
        let mut count = 0;
        space.for_each_object(|header| {
            assert!(header.is_in_construction());
            count += 1;
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn oversized_requests_fail_without_allocating() {
        let mut space = Space::new();
        assert!(space.allocate(usize::MAX - 3, INDEX, false).is_none());
        assert!(space.allocate(u32::MAX as usize, INDEX, false).is_none());
        assert!(space.pages().is_empty());
        assert_eq!(checked_allocation_size(24), Some(32));
        assert_eq!(checked_allocation_size(0), Some(HEADER_SIZE));
    }

    #[test]
    fn promotion_leaves_mixed_cards() {
        let mut space = Space::new();
        let header = space.allocate(32, INDEX, true).unwrap();
        let header = unsafe { header.as_ref() };
        assert!(header.is_young());
        space.promote(header);
        assert!(!header.is_young());
        assert_eq!(space.age(header.address()), Age::Mixed);
        space.reset_age_tables();
        assert_eq!(space.age(header.address()), Age::Old);
    }
}
