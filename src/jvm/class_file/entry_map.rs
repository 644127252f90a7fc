/// Open-addressing hash index from structural hashes to entry indices
///
/// The map only stores `(hash, value)` pairs. Deciding whether a candidate really is the entry
/// being searched for is left to the caller, since that requires looking at the entries
/// themselves (which live in the pool, not in the map).
#[derive(Clone, Debug, Default)]
pub struct EntryMap {
    slots: Vec<Option<Slot>>,
    len: usize,
}

#[derive(Copy, Clone, Debug)]
struct Slot {
    hash: u32,
    value: u32,
}

const MIN_CAPACITY: usize = 16;

impl EntryMap {
    pub fn new() -> EntryMap {
        EntryMap::default()
    }

    /// Find the first value with a matching hash that also satisfies `is_match`
    pub fn find(&self, hash: u32, mut is_match: impl FnMut(u32) -> bool) -> Option<u32> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut pos = hash as usize & mask;
        while let Some(slot) = self.slots[pos] {
            if slot.hash == hash && is_match(slot.value) {
                return Some(slot.value);
            }
            pos = (pos + 1) & mask;
        }
        None
    }

    /// Insert a value (without checking whether an equivalent one is already there)
    pub fn insert(&mut self, hash: u32, value: u32) {
        if (self.len + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }
        Self::place(&mut self.slots, Slot { hash, value });
        self.len += 1;
    }

    fn place(slots: &mut [Option<Slot>], slot: Slot) {
        let mask = slots.len() - 1;
        let mut pos = slot.hash as usize & mask;
        while slots[pos].is_some() {
            pos = (pos + 1) & mask;
        }
        slots[pos] = Some(slot);
    }

    fn grow(&mut self) {
        let capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        let mut slots = vec![None; capacity];
        for slot in self.slots.iter().flatten() {
            Self::place(&mut slots, *slot);
        }
        self.slots = slots;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn colliding_hashes_are_disambiguated_by_caller() {
        let mut map = EntryMap::new();
        map.insert(7, 1);
        map.insert(7, 2);
        map.insert(23, 3);
        assert_eq!(map.find(7, |v| v == 2), Some(2));
        assert_eq!(map.find(7, |_| true), Some(1));
        assert_eq!(map.find(23, |v| v == 1), None);
        assert_eq!(map.find(99, |_| true), None);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut map = EntryMap::new();
        for i in 0..1000u32 {
            map.insert(i.wrapping_mul(0x9E37_79B9), i);
        }
        assert_eq!(map.len, 1000);
        for i in 0..1000u32 {
            assert_eq!(map.find(i.wrapping_mul(0x9E37_79B9), |v| v == i), Some(i));
        }
    }
}
