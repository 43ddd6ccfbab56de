// SPDX-License-Identifier: Apache-2.0

//! Access to the `CPUID` instruction.
//!
//! Everything that touches the instruction itself lives behind the [`Cpuid`]
//! trait. The rest of the exporter only ever sees a [`Reader`], which
//! memoises every `(leaf, subleaf)` pair for the lifetime of one probe and
//! records the maximum basic leaf as soon as leaf zero is read.
//!
//! A reader is created per scrape and dropped with it; nothing is cached
//! across scrapes.

#[cfg(target_arch = "x86_64")]
mod x86_64;

use std::collections::HashMap;
use std::fmt;

use log::debug;

/// The four registers returned by one `CPUID` invocation.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registers(eax={:#010x}, ebx={:#010x}, ecx={:#010x}, edx={:#010x})",
            self.eax, self.ebx, self.ecx, self.edx
        )
    }
}

/// Names one of the four result registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
}

impl Registers {
    /// Returns the value of the named register.
    pub fn get(&self, reg: Register) -> u32 {
        match reg {
            Register::Eax => self.eax,
            Register::Ebx => self.ebx,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
        }
    }
}

/// A source of raw `CPUID` results.
pub trait Cpuid {
    /// Whether the instruction can be executed at all.
    fn available(&self) -> bool;

    /// Executes the instruction for `(leaf, subleaf)`.
    ///
    /// Only called when [`Cpuid::available`] returned `true`.
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Registers;
}

/// The instruction of the CPU this process runs on.
#[derive(Copy, Clone, Debug, Default)]
pub struct Native;

impl Cpuid for Native {
    #[cfg(target_arch = "x86_64")]
    fn available(&self) -> bool {
        x86_64::available()
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn available(&self) -> bool {
        false
    }

    #[cfg(target_arch = "x86_64")]
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Registers {
        x86_64::cpuid(leaf, subleaf)
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn cpuid(&self, _leaf: u32, _subleaf: u32) -> Registers {
        Registers::default()
    }
}

/// Probe-scoped, memoising view of a [`Cpuid`] source.
pub struct Reader<C: Cpuid = Native> {
    cpu: C,
    supported: bool,
    max: Option<u32>,
    cache: HashMap<(u32, u32), Registers>,
    invocations: usize,
}

impl<C: Cpuid> Reader<C> {
    /// Creates a reader, testing once whether the instruction is available.
    pub fn new(cpu: C) -> Self {
        let supported = cpu.available();
        debug!("cpuid available: {}", supported);

        Self {
            cpu,
            supported,
            max: None,
            cache: HashMap::new(),
            invocations: 0,
        }
    }

    /// Whether the instruction is available on this CPU.
    pub fn supported(&self) -> bool {
        self.supported
    }

    /// Returns the registers for `(leaf, subleaf)`.
    ///
    /// Returns `None` if the instruction is unavailable. No bound check
    /// against the maximum leaf happens here; callers decide how to treat
    /// leaves above [`Reader::max_leaf`].
    pub fn query(&mut self, leaf: u32, subleaf: u32) -> Option<Registers> {
        if !self.supported {
            return None;
        }

        if let Some(regs) = self.cache.get(&(leaf, subleaf)) {
            return Some(*regs);
        }

        let regs = self.cpu.cpuid(leaf, subleaf);
        self.invocations += 1;
        debug!("cpuid[{:#x}, {:#x}] = {:?}", leaf, subleaf, regs);

        if (leaf, subleaf) == (0, 0) {
            self.max = Some(regs.eax);
        }

        self.cache.insert((leaf, subleaf), regs);
        Some(regs)
    }

    /// The highest basic leaf, or `None` if the instruction is unavailable.
    pub fn max_leaf(&mut self) -> Option<u32> {
        match self.max {
            Some(max) => Some(max),
            None => self.query(0, 0).map(|regs| regs.eax),
        }
    }

    /// Number of times the underlying instruction was executed.
    pub fn invocations(&self) -> usize {
        self.invocations
    }
}
