// SPDX-License-Identifier: Apache-2.0

use super::ProbeOptions;
use crate::collector::Exporter;

use anyhow::{anyhow, bail};
use clap::Args;
use log::{debug, error, info};
use tiny_http::{Header, Method, Request, Response, Server};

const CONTENT_TYPE: &str = "Content-Type: text/plain; version=0.0.4";

/// Serve the metrics over HTTP.
///
/// Every GET request probes the host anew.
#[derive(Args, Debug)]
pub struct Options {
    #[clap(flatten)]
    pub probe: ProbeOptions,

    /// Address to listen on
    #[clap(long, env = "SGX_EXPORTER_LISTEN", default_value = "0.0.0.0:9086")]
    pub listen: String,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        let exporter = self.probe.exporter();
        let header: Header = CONTENT_TYPE
            .parse()
            .map_err(|_| anyhow!("invalid header {:?}", CONTENT_TYPE))?;

        let srv = Server::http(&self.listen)
            .map_err(|e| anyhow!("failed to listen on {}: {}", self.listen, e))?;
        info!("listening on {}", self.listen);
        info!("probing aesmd at {}", exporter.aesmd.path().display());

        for req in srv.incoming_requests() {
            handle(&exporter, &header, req);
        }

        bail!("HTTP server on {} stopped", self.listen)
    }
}

fn handle(exporter: &Exporter, header: &Header, req: Request) {
    let (code, body) = match req.method() {
        Method::Get => match exporter.render() {
            Ok(body) => (200, body + "\n"),
            Err(e) => {
                error!("failed to collect metrics: {:#}", e);
                (500, format!("failed to collect metrics: {:#}\n", e))
            }
        },
        _ => (405, String::new()),
    };

    debug!(
        "{} {} {} < {:03}",
        req.remote_addr()
            .map(|a| a.to_string())
            .unwrap_or_default(),
        req.method(),
        req.url(),
        code
    );

    let rsp = Response::from_string(body)
        .with_status_code(code)
        .with_header(header.clone());

    if let Err(e) = req.respond(rsp) {
        error!("failed to send response: {}", e);
    }
}
