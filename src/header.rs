use crate::internal::gc_info::GCInfoIndex;
use atomic::{Atomic, Ordering};
use modular_bitfield::prelude::*;
use std::mem::size_of;

// HeapObjectHeader contains meta data per object and is prepended to each
// object.
//
// +-----------------+------+------------------------------------------+
// | name            | bits |                                          |
// +-----------------+------+------------------------------------------+
// | GCInfoIndex     |   14 |                                          |
// | unused          |    1 |                                          |
// | in construction |    1 | In construction encoded as |false|.      |
// +-----------------+------+------------------------------------------+
// | unused          |   14 |                                          |
// | young           |    1 | Allocated since the last promotion.      |
// | mark bit        |    1 |                                          |
// +-----------------+------+------------------------------------------+
// | size            |   32 | Allocation size, header included.        |
// +-----------------+------+------------------------------------------+
//
// Notes:
// - See [GCInfoTable](crate::gc_info_table::GCInfoTable) for constraints on GCInfoIndex.
// - |mark bit| and |in construction| bits are located in separate 16-bit halves
//   so that concurrent markers setting the mark bit never race with the mutator
//   finishing construction.
#[repr(C)]
pub struct HeapObjectHeader {
    encoded_low: Atomic<EncodedLow>,
    encoded_high: Atomic<EncodedHigh>,
    size: u32,
}

pub const ALLOCATION_GRANULARITY: usize = size_of::<usize>();
pub const HEADER_SIZE: usize = size_of::<HeapObjectHeader>();

const _: () = assert!(HEADER_SIZE == 8);

impl HeapObjectHeader {
    /// Creates a header for an object that is still in construction.
    pub fn new(size: usize, index: GCInfoIndex, young: bool) -> Self {
        debug_assert!(size <= u32::MAX as usize);
        debug_assert_eq!(size % ALLOCATION_GRANULARITY, 0);
        Self {
            encoded_low: Atomic::new(
                EncodedLow::new()
                    .with_gc_info_index(index.0)
                    .with_fully_constructed(false),
            ),
            encoded_high: Atomic::new(EncodedHigh::new().with_young(young)),
            size: size as u32,
        }
    }

    #[inline(always)]
    pub fn payload(&self) -> *const u8 {
        (self as *const Self as usize + HEADER_SIZE) as _
    }

    #[inline(always)]
    pub fn payload_end(&self) -> *const u8 {
        (self as *const Self as usize + self.get_size()) as _
    }

    #[inline(always)]
    pub fn from_payload(payload: *const u8) -> *const Self {
        (payload as usize - HEADER_SIZE) as _
    }

    #[inline(always)]
    pub fn address(&self) -> usize {
        self as *const Self as usize
    }

    #[inline(always)]
    pub fn get_gc_info_index(&self) -> GCInfoIndex {
        GCInfoIndex(self.encoded_low.load(Ordering::Relaxed).gc_info_index())
    }

    /// Returns allocation size of the object, header included.
    #[inline(always)]
    pub fn get_size(&self) -> usize {
        self.size as usize
    }

    #[inline(always)]
    pub fn payload_size(&self) -> usize {
        self.get_size() - HEADER_SIZE
    }

    #[inline(always)]
    pub fn is_in_construction(&self) -> bool {
        !self.encoded_low.load(Ordering::Acquire).fully_constructed()
    }

    /// Publishes the fully initialized payload to concurrent markers.
    pub fn mark_as_fully_constructed(&self) {
        let low = self.encoded_low.load(Ordering::Relaxed);
        debug_assert!(!low.fully_constructed());
        self.encoded_low
            .store(low.with_fully_constructed(true), Ordering::Release);
    }

    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.encoded_high.load(Ordering::Acquire).marked()
    }

    /// Sets the mark bit. Returns `true` only for the caller that flipped it.
    #[inline]
    pub fn try_mark_atomic(&self) -> bool {
        self.update_high(|high| {
            if high.marked() {
                None
            } else {
                Some(high.with_marked(true))
            }
        })
    }

    /// Clears the mark bit. Only the sweeper may call this, never during marking.
    pub fn unmark(&self) -> bool {
        self.update_high(|high| {
            if high.marked() {
                Some(high.with_marked(false))
            } else {
                None
            }
        })
    }

    #[inline(always)]
    pub fn is_young(&self) -> bool {
        self.encoded_high.load(Ordering::Relaxed).young()
    }

    pub fn set_young(&self, young: bool) {
        self.update_high(|high| {
            if high.young() == young {
                None
            } else {
                Some(high.with_young(young))
            }
        });
    }

    fn update_high(&self, f: impl Fn(EncodedHigh) -> Option<EncodedHigh>) -> bool {
        let mut old = self.encoded_high.load(Ordering::Relaxed);
        loop {
            let new = match f(old) {
                Some(new) => new,
                None => return false,
            };
            match self.encoded_high.compare_exchange_weak(
                old,
                new,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => old = current,
            }
        }
    }
}

#[bitfield(bits = 16)]
#[repr(u16)]
#[derive(Clone, Copy)]
pub struct EncodedLow {
    gc_info_index: B14,
    #[skip]
    __: B1,
    fully_constructed: bool,
}

#[bitfield(bits = 16)]
#[repr(u16)]
#[derive(Clone, Copy)]
pub struct EncodedHigh {
    #[skip]
    __: B14,
    young: bool,
    marked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_bit_is_set_once() {
        let header = HeapObjectHeader::new(32, GCInfoIndex(3), false);
        assert!(!header.is_marked());
        assert!(header.try_mark_atomic());
        assert!(!header.try_mark_atomic());
        assert!(header.is_marked());
        assert_eq!(header.get_gc_info_index(), GCInfoIndex(3));
    }

    #[test]
    fn construction_and_generation_bits_are_independent_of_mark() {
        let header = HeapObjectHeader::new(16, GCInfoIndex(1), true);
        assert!(header.is_in_construction());
        assert!(header.is_young());
        header.try_mark_atomic();
        header.mark_as_fully_constructed();
        assert!(!header.is_in_construction());
        assert!(header.is_young());
        header.set_young(false);
        assert!(!header.is_young());
        assert!(header.is_marked());
        assert_eq!(header.payload_size(), 16 - HEADER_SIZE);
    }
}
