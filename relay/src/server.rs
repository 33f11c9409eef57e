//! SMTP front end built on `mailin-embedded`.
//!
//! mailin drives each connection on its own blocking thread and hands us
//! protocol events. A session buffers the DATA section and, at end of data,
//! runs the pipeline on the tokio runtime and turns the result into the
//! SMTP reply.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use mailin_embedded::response::OK;
use mailin_embedded::{Handler, Response, Server, SslConfig};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::Config;
use crate::pipeline::{MailHandler, Rejection};

/// Per-connection SMTP state. mailin clones it for every connection.
#[derive(Clone)]
pub struct SmtpSession {
    handler: Arc<dyn MailHandler>,
    runtime: Handle,
    origin: IpAddr,
    from: String,
    to: Vec<String>,
    buffer: Vec<u8>,
}

impl SmtpSession {
    pub fn new(handler: Arc<dyn MailHandler>, runtime: Handle) -> Self {
        Self {
            handler,
            runtime,
            origin: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            from: String::new(),
            to: Vec::new(),
            buffer: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.from.clear();
        self.to.clear();
        self.buffer.clear();
    }
}

impl Handler for SmtpSession {
    fn helo(&mut self, ip: IpAddr, domain: &str) -> Response {
        debug!(origin = %ip, helo = %domain, "smtp_helo");
        self.origin = ip;
        OK
    }

    fn mail(&mut self, ip: IpAddr, domain: &str, from: &str) -> Response {
        debug!(origin = %ip, helo = %domain, from = %from, "smtp_mail_from");
        self.reset();
        self.origin = ip;
        self.from = from.to_string();
        OK
    }

    fn data_start(&mut self, _domain: &str, from: &str, _is8bit: bool, to: &[String]) -> Response {
        debug!(from = %from, to = ?to, "smtp_data_start");
        self.from = from.to_string();
        self.to = to.to_vec();
        self.buffer.clear();
        OK
    }

    fn data(&mut self, buf: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let raw = std::mem::take(&mut self.buffer);
        let handler = Arc::clone(&self.handler);

        let result = self
            .runtime
            .block_on(handler.handle(self.origin, &self.from, &self.to, &raw));

        match result {
            Ok(disposition) => {
                debug!(
                    message_id = %disposition.id,
                    outcome = %disposition.outcome,
                    "smtp_message_accepted"
                );
                OK
            }
            Err(e) => {
                debug!(error = %e, "smtp_message_rejected");
                Response::custom(Rejection::REPLY_CODE, Rejection::REPLY_TEXT.to_string())
            }
        }
    }
}

/// Serve SMTP until the listener fails. Blocks the calling thread.
pub fn run(config: &Config, handler: Arc<dyn MailHandler>, runtime: Handle) -> Result<()> {
    let mut server = Server::new(SmtpSession::new(handler, runtime));
    server.with_name(config.instance_hostname.as_str());
    server
        .with_ssl(SslConfig::None)
        .map_err(|e| anyhow!("SSL config error: {}", e))?;
    server
        .with_addr(config.listen_addr.as_str())
        .map_err(|e| anyhow!("Address config error: {}", e))?;

    info!(address = %config.listen_addr, hostname = %config.instance_hostname, "smtp_listening");

    server.serve().map_err(|e| anyhow!("Server error: {}", e))?;

    Ok(())
}
