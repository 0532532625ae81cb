// lattice.rs — 256-bit byte-set lattice
//
// One bit per possible input byte. ⊥ is the empty set, ⊤ is every byte.
// Used by the loop checker to track which next bytes can reach a node
// without any input being consumed.

use std::fmt;

const WORD_BITS: usize = u64::BITS as usize;
const WORDS: usize = 256 / WORD_BITS;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lattice {
    words: [u64; WORDS],
}

impl Lattice {
    /// ⊥: no byte.
    pub const fn empty() -> Self {
        Lattice { words: [0; WORDS] }
    }

    /// ⊤: every byte.
    pub const fn any() -> Self {
        Lattice {
            words: [u64::MAX; WORDS],
        }
    }

    pub fn single(byte: u8) -> Self {
        let mut l = Self::empty();
        l.insert(byte);
        l
    }

    pub fn from_bytes(bytes: impl IntoIterator<Item = u8>) -> Self {
        let mut l = Self::empty();
        for b in bytes {
            l.insert(b);
        }
        l
    }

    pub fn insert(&mut self, byte: u8) {
        let hi = byte as usize / WORD_BITS;
        let lo = byte as usize % WORD_BITS;
        self.words[hi] |= 1 << lo;
    }

    pub fn contains(&self, byte: u8) -> bool {
        let hi = byte as usize / WORD_BITS;
        let lo = byte as usize % WORD_BITS;
        (self.words[hi] & (1 << lo)) != 0
    }

    pub fn union(&self, other: &Lattice) -> Lattice {
        self.zip(other, |a, b| a | b)
    }

    pub fn intersect(&self, other: &Lattice) -> Lattice {
        self.zip(other, |a, b| a & b)
    }

    pub fn subtract(&self, other: &Lattice) -> Lattice {
        self.zip(other, |a, b| a & !b)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn is_any(&self) -> bool {
        self.words.iter().all(|&w| w == u64::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |&b| self.contains(b))
    }

    fn zip(&self, other: &Lattice, f: impl Fn(u64, u64) -> u64) -> Lattice {
        let mut words = [0; WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = f(self.words[i], other.words[i]);
        }
        Lattice { words }
    }
}

impl fmt::Debug for Lattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Lattice(empty)");
        }
        if self.is_any() {
            return write!(f, "Lattice(any)");
        }
        f.debug_set().entries(self.iter()).finish()
    }
}
