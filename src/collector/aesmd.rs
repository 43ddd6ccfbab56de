// SPDX-License-Identifier: Apache-2.0

//! Liveness probe for the SGX Architectural Enclave Service Manager.
//!
//! aesmd speaks protobuf over a unix socket, each message prefixed by its
//! length as a little-endian `u32`. The probe asks for a launch token for a
//! made-up enclave: a random measurement and the modulus of a throwaway RSA
//! key. Any answer proves the daemon works end to end; an error code of zero
//! means it would actually hand out tokens.

use super::metric::{Line, Value};
use crate::protobuf::aesm_proto::{Request, Request_GetLaunchTokenRequest, Response};

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::socket::{self, sockopt, AddressFamily, SockFlag, SockType, UnixAddr};
use nix::sys::time::{TimeVal, TimeValLike};
use protobuf::Message;
use rand::{thread_rng, RngCore};
use rsa::{BigUint, PublicKeyParts, RsaPrivateKey};

pub const AESM_SOCKET: &str = "/var/run/aesmd/aesm.socket";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout (ms) aesmd may spend producing the token.
const TOKEN_TIMEOUT: u32 = 10_000;

/// SECS.ATTRIBUTES: flags INIT | MODE64BIT, then XFRM x87 | SSE | AVX | MPX.
const ATTRIBUTES: [u8; 16] = [
    0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x1f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const MODULUS_SIZE: usize = 384;
const EXPONENT: u8 = 3;

// No launch-token answer comes anywhere near this.
const MAX_RESPONSE: usize = 1 << 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The daemon answered with this error code.
    Reachable { error: u32 },

    /// Nothing is listening on the socket.
    Unreachable,
}

impl Status {
    pub fn is_up(&self) -> bool {
        matches!(self, Status::Reachable { .. })
    }

    pub fn serviceable(&self) -> bool {
        matches!(self, Status::Reachable { error: 0 })
    }
}

#[derive(Clone, Debug)]
pub struct Client {
    path: PathBuf,
    timeout: Duration,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(AESM_SOCKET, DEFAULT_TIMEOUT)
    }
}

impl Client {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Performs one launch-token exchange.
    ///
    /// Any failure to connect is `Ok(Status::Unreachable)`; errors after
    /// connecting are returned as `Err`.
    pub fn probe(&self) -> Result<Status> {
        let stream = match open(&self.path, self.timeout) {
            Ok(stream) => stream,
            Err(e @ (Errno::ENOENT | Errno::ECONNREFUSED)) => {
                debug!("aesmd at {} is not running: {}", self.path.display(), e);
                return Ok(Status::Unreachable);
            }
            Err(e) => {
                warn!("failed to connect to aesmd at {}: {}", self.path.display(), e);
                return Ok(Status::Unreachable);
            }
        };

        let req = launch_token_request()?;
        let res = send_request(req, stream)?;

        if !res.has_getLicTokenRes() {
            bail!("aesmd response carries no launch token result");
        }

        let error = res.get_getLicTokenRes().get_errorCode();
        debug!("aesmd launch token error code: {}", error);

        Ok(Status::Reachable { error })
    }
}

/// Connects to `path` with `timeout` applied to the connect itself and to
/// every later read and write.
fn open(path: &Path, timeout: Duration) -> nix::Result<UnixStream> {
    let addr = UnixAddr::new(path)?;
    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;

    // SAFETY: `fd` was just created and is owned by nothing else.
    let stream = unsafe { UnixStream::from_raw_fd(fd) };

    // Linux bounds a blocking unix socket connect by SO_SNDTIMEO.
    let tv = timeval(timeout);
    socket::setsockopt(stream.as_raw_fd(), sockopt::SendTimeout, &tv)?;
    socket::setsockopt(stream.as_raw_fd(), sockopt::ReceiveTimeout, &tv)?;
    socket::connect(stream.as_raw_fd(), &addr)?;

    Ok(stream)
}

fn timeval(timeout: Duration) -> TimeVal {
    let secs = timeout.as_secs().min(i32::MAX as u64) as i64;
    TimeVal::seconds(secs) + TimeVal::microseconds(timeout.subsec_micros().into())
}

fn launch_token_request() -> Result<Request> {
    let mut rng = thread_rng();

    let mut enclavehash = [0u8; 32];
    rng.fill_bytes(&mut enclavehash);

    let exp = BigUint::from(EXPONENT);
    let key = RsaPrivateKey::new_with_exp(&mut rng, MODULUS_SIZE * 8, &exp)
        .context("failed to generate RSA key")?;

    let mut msg = Request_GetLaunchTokenRequest::new();
    msg.set_enclavehash(enclavehash.to_vec());
    msg.set_modulus(modulus(key.n()));
    msg.set_attributes(ATTRIBUTES.to_vec());
    msg.set_timeout(TOKEN_TIMEOUT);

    let mut req = Request::new();
    req.set_getLicTokenReq(msg);
    Ok(req)
}

/// The modulus as a fixed-size little-endian integer.
fn modulus(n: &BigUint) -> Vec<u8> {
    let mut bytes = n.to_bytes_le();
    bytes.resize(MODULUS_SIZE, 0);
    bytes
}

fn send_request(req: Request, mut stream: UnixStream) -> Result<Response> {
    let body = req
        .write_to_bytes()
        .context("failed to encode aesmd request")?;

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&u32::try_from(body.len())?.to_le_bytes());
    buf.extend_from_slice(&body);

    stream
        .write_all(&buf)
        .context("failed to send aesmd request")?;
    stream.flush()?;

    let mut len = [0u8; 4];
    stream
        .read_exact(&mut len)
        .context("failed to read aesmd response length")?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_RESPONSE {
        bail!("aesmd response too large: {} bytes", len);
    }

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .context("failed to read aesmd response")?;

    Message::parse_from_bytes(&body).context("failed to decode aesmd response")
}

pub fn lines(status: &Result<Status>) -> Vec<Line> {
    match status {
        Ok(status @ Status::Reachable { error }) => vec![
            Line::metric("aesmd_up", Value::Bool(status.is_up())),
            Line::metric("aesmd_serviceable", Value::Bool(status.serviceable())),
            Line::comment(format!("aesmd_error {}", error)),
        ],

        Ok(Status::Unreachable) => vec![
            Line::comment(" aesmd: not running"),
            Line::metric("aesmd_up", Value::Bool(false)),
            Line::metric("aesmd_serviceable", Value::Bool(false)),
        ],

        Err(e) => vec![
            Line::comment(format!(" aesmd: {:#}", e).replace('\n', " ")),
            Line::metric("aesmd_up", Value::Bool(true)),
            Line::metric("aesmd_serviceable", Value::Bool(false)),
        ],
    }
}
