// SPDX-License-Identifier: Apache-2.0

use super::Registers;

use std::arch::asm;
use std::arch::x86_64::__cpuid_count;

/// Checks whether `RFLAGS.ID` (bit 21) can be toggled.
///
/// The flags register is restored before returning.
pub fn available() -> bool {
    let diff: u64;

    unsafe {
        asm!(
            "pushfq",
            "pushfq",
            "xor qword ptr [rsp], 0x200000",
            "popfq",
            "pushfq",
            "pop {diff}",
            "xor {diff}, [rsp]",
            "popfq",
            diff = out(reg) diff,
        );
    }

    diff == 1 << 21
}

pub fn cpuid(leaf: u32, subleaf: u32) -> Registers {
    let res = unsafe { __cpuid_count(leaf, subleaf) };

    Registers {
        eax: res.eax,
        ebx: res.ebx,
        ecx: res.ecx,
        edx: res.edx,
    }
}
