// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Descriptor sets for the readiness-multiplexing operation.

use crate::table::Fd;

/// The highest descriptor number (exclusive) an [`FdSet`] can hold.
pub const FD_SETSIZE: usize = 1024;

const WORDS: usize = FD_SETSIZE / 64;

/// A fixed-capacity set of descriptor numbers, analogous to `fd_set`.
#[derive(Clone, PartialEq, Eq)]
pub struct FdSet {
    bits: [u64; WORDS],
}

impl FdSet {
    /// The empty set.
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    fn position(fd: Fd) -> (usize, u64) {
        let n = fd.raw() as usize;
        assert!(n < FD_SETSIZE, "descriptor {n} exceeds FD_SETSIZE");
        (n / 64, 1u64 << (n % 64))
    }

    /// Add `fd` to the set.
    pub fn insert(&mut self, fd: Fd) {
        let (word, mask) = Self::position(fd);
        self.bits[word] |= mask;
    }

    /// Remove `fd` from the set.
    pub fn remove(&mut self, fd: Fd) {
        let (word, mask) = Self::position(fd);
        self.bits[word] &= !mask;
    }

    /// Whether `fd` is a member of the set.
    pub fn contains(&self, fd: Fd) -> bool {
        let (word, mask) = Self::position(fd);
        self.bits[word] & mask != 0
    }

    /// Remove all members.
    pub fn clear(&mut self) {
        self.bits = [0; WORDS];
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// The number of members.
    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Fd> + '_ {
        self.bits.iter().enumerate().flat_map(|(word, bits)| {
            let mut bits = *bits;
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros();
                bits &= bits - 1;
                Some(Fd::from_raw((word as u32) * 64 + bit))
            })
        })
    }
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FdSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Fd> for FdSet {
    fn from_iter<I: IntoIterator<Item = Fd>>(iter: I) -> Self {
        let mut set = Self::new();
        for fd in iter {
            set.insert(fd);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn insert_contains_remove() {
        let mut set = FdSet::new();
        assert!(set.is_empty());
        set.insert(Fd::from_raw(0));
        set.insert(Fd::from_raw(63));
        set.insert(Fd::from_raw(64));
        set.insert(Fd::from_raw(1023));
        assert_eq!(set.len(), 4);
        assert!(set.contains(Fd::from_raw(63)));
        assert!(!set.contains(Fd::from_raw(62)));
        set.remove(Fd::from_raw(63));
        assert!(!set.contains(Fd::from_raw(63)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn iteration_is_ascending() {
        let set: FdSet = [5u32, 200, 3, 64]
            .into_iter()
            .map(Fd::from_raw)
            .collect();
        let members: Vec<u32> = set.iter().map(|fd| fd.raw()).collect();
        assert_eq!(members, [3, 5, 64, 200]);
    }

    #[test]
    #[should_panic(expected = "exceeds FD_SETSIZE")]
    fn oversized_descriptor_panics() {
        let mut set = FdSet::new();
        set.insert(Fd::from_raw(FD_SETSIZE as u32));
    }
}
