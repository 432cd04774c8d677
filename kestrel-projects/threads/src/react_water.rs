//! # Water reaction.
//!
//! A [`ReactWater`] bonds arriving atoms into water molecules. Hydrogen and
//! oxygen threads arrive in any order; every molecule takes exactly two
//! hydrogen threads and one oxygen thread, and no atom returns before its
//! molecule is made.
//!
//! The reaction is built from semaphores alone:
//!
//! - each hydrogen signals `hydrogen` and then waits on `bonded`;
//! - oxygen threads take turns through the binary `oxygen` semaphore. The
//!   oxygen holding it consumes two `hydrogen` permits, makes the molecule,
//!   and signals `bonded` twice to release its two hydrogens.
use crate::sync::Semaphore;
use kestrel::sync::atomic::AtomicUsize;

/// Bonds hydrogen and oxygen threads into water molecules.
pub struct ReactWater {
    hydrogen: Semaphore<()>,
    bonded: Semaphore<()>,
    oxygen: Semaphore<()>,
    molecules: AtomicUsize,
}

impl Default for ReactWater {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactWater {
    /// Creates a reaction with no atom waiting.
    pub fn new() -> Self {
        Self {
            hydrogen: Semaphore::new(0, ()),
            bonded: Semaphore::new(0, ()),
            oxygen: Semaphore::new(1, ()),
            molecules: AtomicUsize::new(0),
        }
    }

    /// A hydrogen atom arrives. Returns once it is part of a molecule.
    pub fn hydrogen(&self) {
        self.hydrogen.signal();
        self.bonded.wait().forget();
    }

    /// An oxygen atom arrives. Returns once it is part of a molecule.
    ///
    /// Returns the number of the molecule made, counting from 1.
    pub fn oxygen(&self) -> usize {
        let turn = self.oxygen.wait();
        self.hydrogen.wait().forget();
        self.hydrogen.wait().forget();
        let molecule = self.molecules.fetch_add(1) + 1;
        kestrel::debug!("We have water (molecule {}).", molecule);
        self.bonded.signal();
        self.bonded.signal();
        drop(turn);
        molecule
    }

    /// Number of molecules made so far.
    pub fn molecules(&self) -> usize {
        self.molecules.load()
    }
}
