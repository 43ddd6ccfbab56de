// SPDX-License-Identifier: Apache-2.0

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
