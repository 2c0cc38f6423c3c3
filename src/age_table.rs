/// Generation of the memory covered by one card.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Age {
    /// Only objects that survived a collection.
    Old,
    /// Only objects allocated since the last reset.
    Young,
    /// Both, so slots on this card may hold old-to-young pointers.
    Mixed,
}

/// Per-page table classifying cards as young or old. Maintained by the
/// allocator, consulted by the generational write barrier to filter slots
/// that cannot hold old-to-young pointers, and reset to [`Age::Old`] once a
/// cycle finished.
pub struct AgeTable {
    cards: Vec<Age>,
}

impl AgeTable {
    pub const CARD_SHIFT: usize = 9;
    pub const CARD_SIZE: usize = 1 << Self::CARD_SHIFT;

    pub fn new(page_size: usize) -> Self {
        let cards = (page_size + Self::CARD_SIZE - 1) >> Self::CARD_SHIFT;
        Self {
            cards: vec![Age::Old; cards],
        }
    }

    #[inline]
    pub fn card_from_offset(offset: usize) -> usize {
        offset >> Self::CARD_SHIFT
    }

    #[inline]
    pub fn offset_from_card(card: usize) -> usize {
        card << Self::CARD_SHIFT
    }

    /// Age of the card covering `offset`; out of range offsets count as old.
    pub fn get_age(&self, offset: usize) -> Age {
        self.cards
            .get(Self::card_from_offset(offset))
            .copied()
            .unwrap_or(Age::Old)
    }

    pub fn set_age(&mut self, offset: usize, age: Age) {
        if let Some(card) = self.cards.get_mut(Self::card_from_offset(offset)) {
            *card = age;
        }
    }

    /// Records a young allocation covering `[begin, end)`. A card that already
    /// held older contents before `begin` becomes mixed.
    pub fn mark_young_range(&mut self, begin: usize, end: usize) {
        if begin >= end {
            return;
        }
        let first = Self::card_from_offset(begin);
        let last = Self::card_from_offset(end - 1);
        for card in first..=last.min(self.cards.len().saturating_sub(1)) {
            let shared = Self::offset_from_card(card) < begin;
            let age = &mut self.cards[card];
            *age = match (*age, shared) {
                (_, false) => Age::Young,
                (Age::Young, true) => Age::Young,
                (_, true) => Age::Mixed,
            };
        }
    }

    /// Records that the object covering `[begin, end)` became old.
    pub fn demote_range(&mut self, begin: usize, end: usize) {
        if begin >= end {
            return;
        }
        let first = Self::card_from_offset(begin);
        let last = Self::card_from_offset(end - 1);
        for card in first..=last.min(self.cards.len().saturating_sub(1)) {
            if self.cards[card] == Age::Young {
                self.cards[card] = Age::Mixed;
            }
        }
    }

    pub fn reset(&mut self) {
        for card in self.cards.iter_mut() {
            *card = Age::Old;
        }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cards_become_young_shared_cards_mixed() {
        let mut table = AgeTable::new(4 * AgeTable::CARD_SIZE);
        table.mark_young_range(0, AgeTable::CARD_SIZE + 16);
        assert_eq!(table.get_age(0), Age::Young);
        assert_eq!(table.get_age(AgeTable::CARD_SIZE), Age::Young);
        // Second young object shares card 1 with the first one.
        table.mark_young_range(AgeTable::CARD_SIZE + 16, AgeTable::CARD_SIZE + 64);
        assert_eq!(table.get_age(AgeTable::CARD_SIZE), Age::Young);

        table.demote_range(0, AgeTable::CARD_SIZE + 16);
        assert_eq!(table.get_age(0), Age::Mixed);
        assert_eq!(table.get_age(AgeTable::CARD_SIZE), Age::Mixed);

        table.reset();
        assert_eq!(table.get_age(0), Age::Old);
        assert_eq!(table.get_age(100 * AgeTable::CARD_SIZE), Age::Old);
    }

    #[test]
    fn young_allocation_after_old_contents_is_mixed() {
        let mut table = AgeTable::new(2 * AgeTable::CARD_SIZE);
        table.mark_young_range(64, 128);
        assert_eq!(table.get_age(64), Age::Mixed);
    }
}
