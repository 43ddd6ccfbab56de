// SPDX-License-Identifier: Apache-2.0

//! SGX-related CPU capabilities.

use super::epc;
use super::metric::{Line, Value};
use crate::cpuid::{Cpuid, Reader, Register};

use anyhow::{Context, Result};
use log::warn;

pub const INTEL: &str = "GenuineIntel";

const SGX_LEAF: u32 = 0x12;

/// A single capability bit: `CPUID[leaf, subleaf].reg & (1 << bit)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bit {
    pub leaf: u32,
    pub subleaf: u32,
    pub reg: Register,
    pub bit: u8,
}

impl Bit {
    /// Evaluates the bit, or `None` if the leaf is beyond the maximum leaf.
    pub fn query<C: Cpuid>(&self, reader: &mut Reader<C>) -> Option<bool> {
        if self.leaf > reader.max_leaf()? {
            return None;
        }

        let regs = reader.query(self.leaf, self.subleaf)?;
        Some(regs.get(self.reg) & (1 << self.bit) != 0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Sgx,
    Flc,
    Sgx1,
    Sgx2,
    SgxVirt,
    SgxMemConcurrency,
    Cet,
    Kss,
}

impl Capability {
    /// All capabilities in exposition order.
    pub const ALL: [Capability; 8] = [
        Capability::Sgx,
        Capability::Flc,
        Capability::Sgx1,
        Capability::Sgx2,
        Capability::SgxVirt,
        Capability::SgxMemConcurrency,
        Capability::Cet,
        Capability::Kss,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Sgx => "is_sgx_supported",
            Capability::Flc => "is_flc_supported",
            Capability::Sgx1 => "is_sgx1_supported",
            Capability::Sgx2 => "is_sgx2_supported",
            Capability::SgxVirt => "is_sgx_virt_supported",
            Capability::SgxMemConcurrency => "is_sgx_mem_concurrency_supported",
            Capability::Cet => "is_cet_supported",
            Capability::Kss => "is_kss_supported",
        }
    }

    pub fn bit(self) -> Bit {
        let (leaf, subleaf, reg, bit) = match self {
            Capability::Sgx => (0x07, 0, Register::Ebx, 2),
            Capability::Flc => (0x07, 0, Register::Ecx, 30),
            Capability::Sgx1 => (SGX_LEAF, 0, Register::Eax, 0),
            Capability::Sgx2 => (SGX_LEAF, 0, Register::Eax, 1),
            // Reads the SGX2 bit rather than ENCLV (bit 5). Exported values
            // depend on this, so it stays until checked against hardware.
            Capability::SgxVirt => (SGX_LEAF, 0, Register::Eax, 1),
            Capability::SgxMemConcurrency => (SGX_LEAF, 0, Register::Eax, 6),
            Capability::Cet => (SGX_LEAF, 1, Register::Eax, 6),
            Capability::Kss => (SGX_LEAF, 1, Register::Eax, 7),
        };

        Bit {
            leaf,
            subleaf,
            reg,
            bit,
        }
    }
}

/// Everything learned from `CPUID` during one probe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub supported: bool,
    pub vendor: String,
    pub intel: bool,
    pub max_enclave_size_32: u64,
    pub max_enclave_size_64: u64,
    pub epc_size: u64,
    pub caps: Vec<(Capability, Option<bool>)>,
}

impl Snapshot {
    pub fn probe<C: Cpuid>(reader: &mut Reader<C>) -> Result<Self> {
        let mut snap = Snapshot {
            supported: reader.supported(),
            caps: Capability::ALL.iter().map(|c| (*c, None)).collect(),
            ..Default::default()
        };

        let (leaf0, max) = match (reader.query(0, 0), reader.max_leaf()) {
            (Some(leaf0), Some(max)) => (leaf0, max),
            _ => return Ok(snap),
        };

        snap.vendor = vendor(leaf0.ebx, leaf0.edx, leaf0.ecx);
        snap.intel = snap.vendor == INTEL;

        for (cap, value) in snap.caps.iter_mut() {
            *value = cap.bit().query(reader);
        }

        if max < SGX_LEAF {
            return Ok(snap);
        }

        if snap.capability(Capability::Sgx) == Some(true) {
            if let Some(regs) = reader.query(SGX_LEAF, 0) {
                snap.max_enclave_size_32 = enclave_size(regs.edx & 0xff);
                snap.max_enclave_size_64 = enclave_size((regs.edx >> 8) & 0xff);
            }
        }

        snap.epc_size = epc::size(reader).context("failed to enumerate EPC sections")?;

        Ok(snap)
    }

    pub fn capability(&self, cap: Capability) -> Option<bool> {
        self.caps
            .iter()
            .find(|(c, _)| *c == cap)
            .and_then(|(_, v)| *v)
    }

    pub fn lines(&self) -> Vec<Line> {
        let mut lines = vec![
            Line::metric("cpuid_is_cpuid_supported", Value::Bool(self.supported)),
            Line::labelled(
                "cpuid_is_intel_cpu",
                "vendor_id",
                self.vendor.clone(),
                Value::Bool(self.intel),
            ),
            Line::labelled(
                "cpuid_max_enclave_size_bytes",
                "arch",
                "x86",
                Value::Hex(self.max_enclave_size_32),
            ),
            Line::labelled(
                "cpuid_max_enclave_size_bytes",
                "arch",
                "x86_64",
                Value::Hex(self.max_enclave_size_64),
            ),
            Line::metric("cpuid_epc_size_bytes", Value::Hex(self.epc_size)),
        ];

        for (cap, value) in &self.caps {
            let name = format!("cpuid_{}", cap.name());
            lines.push(match value {
                Some(b) => Line::metric(name, Value::Bool(*b)),
                None => Line::comment(format!("{} unknown", name)),
            });
        }

        lines
    }
}

/// Decodes the 12-byte vendor identification string as ASCII.
///
/// Bytes outside ASCII are written as `\xNN`.
pub fn vendor(ebx: u32, edx: u32, ecx: u32) -> String {
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&ebx.to_le_bytes());
    bytes[4..8].copy_from_slice(&edx.to_le_bytes());
    bytes[8..12].copy_from_slice(&ecx.to_le_bytes());

    let mut out = String::with_capacity(bytes.len());
    for b in bytes {
        if b.is_ascii() {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

fn enclave_size(bits: u32) -> u64 {
    match 1u64.checked_shl(bits) {
        Some(size) => size,
        None => {
            warn!("maximum enclave size exponent {} out of range", bits);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::tests::{regs, Fake};
    use crate::cpuid::Registers;

    const EBX: u32 = 0x756e6547;
    const EDX: u32 = 0x49656e69;
    const ECX: u32 = 0x6c65746e;

    fn intel(max: u32) -> Fake {
        Fake::default().with(0, 0, regs(max, EBX, ECX, EDX))
    }

    fn sgx_machine() -> Fake {
        intel(0x1b)
            .with(0x07, 0, regs(0, 1 << 2, 1 << 30, 0))
            .with(SGX_LEAF, 0, regs(0b0000_0011, 0, 0, 0x241f))
            .with(SGX_LEAF, 1, regs(1 << 7, 0, 0, 0))
            .with(SGX_LEAF, 2, regs(0x1, 0, 0x05d8_0001, 0))
    }

    #[test]
    fn vendor_id() {
        assert_eq!(vendor(EBX, EDX, ECX), "GenuineIntel");
    }

    #[test]
    fn vendor_non_ascii() {
        // "Genu" "ine\xe9" "ntel"
        let edx = u32::from_le_bytes([b'i', b'n', b'e', 0xe9]);
        assert_eq!(vendor(EBX, edx, ECX), "Genuine\\xe9ntel");
    }

    #[test]
    fn unsupported_cpu() {
        let fake = Fake {
            absent: true,
            ..Default::default()
        };
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();

        assert!(!snap.supported);
        assert_eq!(snap.vendor, "");
        assert!(!snap.intel);
        assert_eq!(snap.max_enclave_size_32, 0);
        assert_eq!(snap.epc_size, 0);
        assert!(snap.caps.iter().all(|(_, v)| v.is_none()));
        assert_eq!(fake.calls.get(), 0);
    }

    #[test]
    fn sgx_platform() {
        let fake = sgx_machine();
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();

        assert!(snap.intel);
        assert_eq!(snap.max_enclave_size_32, 1 << 0x1f);
        assert_eq!(snap.max_enclave_size_64, 1 << 0x24);
        assert_eq!(snap.epc_size, 0x05d8_0000);

        assert_eq!(snap.capability(Capability::Sgx), Some(true));
        assert_eq!(snap.capability(Capability::Flc), Some(true));
        assert_eq!(snap.capability(Capability::Sgx1), Some(true));
        assert_eq!(snap.capability(Capability::Sgx2), Some(true));
        assert_eq!(snap.capability(Capability::SgxVirt), Some(true));
        assert_eq!(snap.capability(Capability::SgxMemConcurrency), Some(false));
        assert_eq!(snap.capability(Capability::Cet), Some(false));
        assert_eq!(snap.capability(Capability::Kss), Some(true));
    }

    #[test]
    fn leaves_beyond_max_are_unknown() {
        let fake = intel(0x0d).with(0x07, 0, regs(0, 1 << 2, 0, 0));
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();

        for cap in Capability::ALL {
            let expected = match cap.bit().leaf {
                0x07 => Some(cap == Capability::Sgx),
                _ => None,
            };
            assert_eq!(snap.capability(cap), expected, "{:?}", cap);
        }

        assert_eq!(snap.max_enclave_size_32, 0);
        assert_eq!(snap.max_enclave_size_64, 0);
        assert_eq!(snap.epc_size, 0);
    }

    #[test]
    fn no_sgx_no_enclave_size() {
        let fake = intel(0x1b).with(SGX_LEAF, 0, regs(0, 0, 0, 0x241f));
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();

        assert_eq!(snap.capability(Capability::Sgx), Some(false));
        assert_eq!(snap.max_enclave_size_32, 0);
        assert_eq!(snap.max_enclave_size_64, 0);
    }

    #[test]
    fn other_vendor() {
        let fake = Fake::default().with(
            0,
            0,
            Registers {
                eax: 0x10,
                ebx: 0x68747541,
                ecx: 0x444d4163,
                edx: 0x69746e65,
            },
        );
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();

        assert_eq!(snap.vendor, "AuthenticAMD");
        assert!(!snap.intel);
    }

    #[test]
    fn each_leaf_read_once() {
        let fake = sgx_machine();
        let mut reader = Reader::new(&fake);
        Snapshot::probe(&mut reader).unwrap();

        // (0,0) (7,0) (0x12,0) (0x12,1) (0x12,2) (0x12,3)
        assert_eq!(fake.calls.get(), 6);
    }

    #[test]
    fn rendered() {
        let fake = sgx_machine();
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();
        let text: Vec<String> = snap.lines().iter().map(ToString::to_string).collect();

        assert_eq!(text[0], "cpuid_is_cpuid_supported 1");
        assert_eq!(text[1], "cpuid_is_intel_cpu{vendor_id=\"GenuineIntel\"} 1");
        assert_eq!(text[2], "cpuid_max_enclave_size_bytes{arch=\"x86\"} 0x80000000");
        assert_eq!(
            text[3],
            "cpuid_max_enclave_size_bytes{arch=\"x86_64\"} 0x1000000000"
        );
        assert_eq!(text[4], "cpuid_epc_size_bytes 0x5d80000");
        assert_eq!(text[5], "cpuid_is_sgx_supported 1");
        assert_eq!(text[10], "cpuid_is_sgx_mem_concurrency_supported 0");
        assert_eq!(text.len(), 5 + Capability::ALL.len());
    }

    #[test]
    fn rendered_unknown() {
        let fake = Fake {
            absent: true,
            ..Default::default()
        };
        let snap = Snapshot::probe(&mut Reader::new(&fake)).unwrap();
        let text: Vec<String> = snap.lines().iter().map(ToString::to_string).collect();

        assert_eq!(text[0], "cpuid_is_cpuid_supported 0");
        assert_eq!(text[1], "cpuid_is_intel_cpu{vendor_id=\"\"} 0");
        assert_eq!(text[2], "cpuid_max_enclave_size_bytes{arch=\"x86\"} 0x0");
        assert!(text.contains(&"#cpuid_is_sgx_supported unknown".to_string()));
        assert!(!text.iter().any(|l| l.starts_with("cpuid_is_sgx_supported")));
    }
}
