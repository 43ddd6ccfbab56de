// SPDX-License-Identifier: Apache-2.0

//! Enclave Page Cache size.
//!
//! `CPUID[0x12, n]` for `n >= 2` enumerates EPC sections until a descriptor
//! of type zero. Only type one (a valid section) contributes to the size.

use crate::cpuid::{Cpuid, Reader};

use anyhow::{bail, Result};
use log::debug;

pub const LEAF: u32 = 0x12;
pub const FIRST_SUBLEAF: u32 = 2;

/// Upper bound on the number of descriptors walked before giving up.
pub const MAX_SECTIONS: u32 = 256;

const TYPE_INVALID: u32 = 0;
const TYPE_SECTION: u32 = 1;

/// Sums the sizes of all EPC sections.
///
/// Fails if no terminating descriptor is found within [`MAX_SECTIONS`].
pub fn size<C: Cpuid>(reader: &mut Reader<C>) -> Result<u64> {
    let mut total = 0u64;

    for subleaf in FIRST_SUBLEAF..FIRST_SUBLEAF + MAX_SECTIONS {
        let regs = match reader.query(LEAF, subleaf) {
            Some(regs) => regs,
            None => return Ok(0),
        };

        match regs.eax & 0xf {
            TYPE_INVALID => return Ok(total),
            TYPE_SECTION => {
                let low = regs.ecx as u64 & 0xfffff000;
                let high = (regs.edx as u64 & 0x000fffff) << 32;
                total += low + high;
            }
            kind => debug!("skipping EPC descriptor {} of type {}", subleaf, kind),
        }
    }

    bail!(
        "CPUID leaf {:#x} reported more than {} EPC descriptors without a terminator",
        LEAF,
        MAX_SECTIONS
    )
}
