// SPDX-License-Identifier: Apache-2.0

//! SGX driver detection from device nodes.

use super::metric::{Line, Value};

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use log::debug;

/// Device nodes of the known driver variants.
pub const DRIVERS: &[(&str, &str)] = &[
    ("inkernel", "/dev/sgx_enclave"),
    ("dcap", "/dev/sgx/enclave"),
    ("oot", "/dev/isgx"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Driver {
    pub name: &'static str,
    pub path: PathBuf,
}

impl Driver {
    /// The fixed table of driver variants.
    pub fn known() -> Vec<Driver> {
        DRIVERS
            .iter()
            .map(|&(name, path)| Driver {
                name,
                path: PathBuf::from(path),
            })
            .collect()
    }
}

/// Whether `path` itself is a character device.
///
/// The final component is not followed: a symlink to a real device node is
/// reported absent, so the node cannot be faked from a writable directory.
pub fn present(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => meta.file_type().is_char_device(),
        Err(e) => {
            debug!("{}: {}", path.display(), e);
            false
        }
    }
}

/// Checks every driver and returns `(name, present)` in table order.
pub fn detect(drivers: &[Driver]) -> Vec<(&'static str, bool)> {
    drivers
        .iter()
        .map(|driver| (driver.name, present(&driver.path)))
        .collect()
}

pub fn lines(status: &[(&'static str, bool)]) -> Vec<Line> {
    status
        .iter()
        .map(|(name, present)| Line::labelled("sgx_driver", "type", *name, Value::Bool(*present)))
        .collect()
}
