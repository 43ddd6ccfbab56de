// SPDX-License-Identifier: Apache-2.0

//! Probes the platform and renders the results in the Prometheus text format.
//!
//! Every render starts from scratch: a new CPUID reader, a fresh look at the
//! device nodes and a new connection to aesmd. The collectors run one after
//! another and their lines are concatenated in a fixed order.

pub mod aesmd;
pub mod cpuid;
pub mod driver;
pub mod epc;
pub mod metric;

use crate::cpuid::{Cpuid, Native, Reader};
use driver::Driver;
use metric::Line;

use anyhow::{Context, Result};
use log::{debug, warn};

#[derive(Clone, Debug)]
pub struct Exporter {
    pub drivers: Vec<Driver>,
    pub aesmd: aesmd::Client,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(aesmd::Client::default())
    }
}

impl Exporter {
    pub fn new(aesmd: aesmd::Client) -> Self {
        Self {
            drivers: Driver::known(),
            aesmd,
        }
    }

    /// Probes this host and returns the exposition body, without the final
    /// newline.
    pub fn render(&self) -> Result<String> {
        self.render_with(Native)
    }

    /// Like [`Exporter::render`], reading CPUID from `cpu`.
    ///
    /// Fails only if the CPUID data cannot be enumerated; a broken aesmd
    /// exchange is reported inside the body.
    pub fn render_with<C: Cpuid>(&self, cpu: C) -> Result<String> {
        let mut lines: Vec<Line> = Vec::new();

        let mut reader = Reader::new(cpu);
        let snap = cpuid::Snapshot::probe(&mut reader).context("CPUID probe failed")?;
        lines.extend(snap.lines());
        debug!("CPUID executed {} times", reader.invocations());

        lines.extend(driver::lines(&driver::detect(&self.drivers)));

        let status = self.aesmd.probe();
        if let Err(e) = &status {
            warn!("aesmd probe failed: {:#}", e);
        }
        lines.extend(aesmd::lines(&status));

        Ok(lines
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::tests::{regs, Fake};

    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::tempdir;

    fn exporter(dir: &std::path::Path) -> Exporter {
        Exporter {
            drivers: vec![
                Driver {
                    name: "inkernel",
                    path: PathBuf::from("/dev/null"),
                },
                Driver {
                    name: "dcap",
                    path: dir.join("enclave"),
                },
            ],
            aesmd: aesmd::Client::new(dir.join("aesm.socket"), Duration::from_secs(1)),
        }
    }

    #[test]
    fn without_cpuid() {
        let dir = tempdir().unwrap();
        let fake = Fake {
            absent: true,
            ..Default::default()
        };

        let body = exporter(dir.path()).render_with(&fake).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines[0], "cpuid_is_cpuid_supported 0");
        assert!(lines.contains(&"cpuid_max_enclave_size_bytes{arch=\"x86\"} 0x0"));
        assert!(!lines.iter().any(|l| l.starts_with("cpuid_is_sgx_supported")));
        assert!(lines.contains(&"sgx_driver{type=\"inkernel\"} 1"));
        assert!(lines.contains(&"sgx_driver{type=\"dcap\"} 0"));
        assert_eq!(&lines[lines.len() - 2..], ["aesmd_up 0", "aesmd_serviceable 0"]);
        assert!(!body.ends_with('\n'));
    }

    #[test]
    fn section_order() {
        let dir = tempdir().unwrap();
        let fake = Fake::default().with(0, 0, regs(0x1b, 0x756e6547, 0x6c65746e, 0x49656e69));

        let body = exporter(dir.path()).render_with(&fake).unwrap();
        let pos = |prefix: &str| body.lines().position(|l| l.starts_with(prefix)).unwrap();

        assert!(pos("cpuid_is_cpuid_supported") < pos("cpuid_is_sgx_supported"));
        assert!(pos("cpuid_is_kss_supported") < pos("sgx_driver"));
        assert!(pos("sgx_driver") < pos("aesmd_up"));
    }

    #[test]
    fn idempotent() {
        let dir = tempdir().unwrap();
        let exporter = exporter(dir.path());
        let fake = Fake::default()
            .with(0, 0, regs(0x1b, 0x756e6547, 0x6c65746e, 0x49656e69))
            .with(0x12, 2, regs(0x1, 0, 0x0400_0000, 0));

        let first = exporter.render_with(&fake).unwrap();
        let second = exporter.render_with(&fake).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn aesmd_failure_isolated() {
        use std::io::{Read, Write};
        use std::os::unix::net::UnixListener;

        let dir = tempdir().unwrap();
        let listener = UnixListener::bind(dir.path().join("aesm.socket")).unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).unwrap();
            let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
            stream.read_exact(&mut body).unwrap();
            stream.write_all(&[2, 0, 0, 0, 0xff, 0xff]).unwrap();
        });

        let fake = Fake::default().with(0, 0, regs(0x1b, 0x756e6547, 0x6c65746e, 0x49656e69));
        let body = exporter(dir.path()).render_with(&fake).unwrap();
        server.join().unwrap();

        let lines: Vec<&str> = body.lines().collect();
        assert!(lines.contains(&"sgx_driver{type=\"inkernel\"} 1"));
        assert!(lines[lines.len() - 3].starts_with("# aesmd: "));
        assert_eq!(&lines[lines.len() - 2..], ["aesmd_up 1", "aesmd_serviceable 0"]);
    }

    #[test]
    fn fatal_cpuid() {
        let dir = tempdir().unwrap();
        let mut fake = Fake::default().with(0, 0, regs(0x1b, 0, 0, 0));
        for subleaf in epc::FIRST_SUBLEAF..epc::FIRST_SUBLEAF + epc::MAX_SECTIONS {
            fake = fake.with(0x12, subleaf, regs(0x2, 0, 0, 0));
        }

        assert!(exporter(dir.path()).render_with(&fake).is_err());
    }

    #[test]
    fn native() {
        let dir = tempdir().unwrap();
        let body = exporter(dir.path()).render().unwrap();

        assert!(body.starts_with("cpuid_is_cpuid_supported "));
    }
}
