//! A minimal outbound RFC 5321 SMTP client, pooled by target host
//! (spec.md §5 "SmtpClient connections: pooled by target host").
//! The teacher's `smtp-server`/`smtp-message` crates (`src/lmtp.rs`)
//! parse an *inbound* LMTP conversation; there is no client-side
//! submission code in the pack to adapt, so this speaks the wire
//! directly, grounded on `oryx-proto`'s own line-based connection loops
//! (`BufStream` + `read_until`/`read_line`) rather than on a teacher
//! file.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::spool::{RecipientAction, RecipientRow};

pub struct Envelope<'a> {
    pub sender: Option<&'a str>,
    pub recipients: &'a [RecipientRow],
    pub message: &'a [u8],
}

#[async_trait::async_trait]
pub trait SmtpClient: Send + Sync {
    /// Submits one envelope, returning the outcome for every recipient
    /// in the same order they were given.
    async fn submit(&mut self, envelope: Envelope<'_>) -> Result<Vec<RecipientRow>>;
}

/// One plaintext connection to a single upstream smarthost.
pub struct TcpSmtpClient {
    host: String,
    port: u16,
    helo_name: String,
    conn: Option<BufStream<TcpStream>>,
}

impl TcpSmtpClient {
    pub fn new(host: String, port: u16, helo_name: String) -> Self {
        Self {
            host,
            port,
            helo_name,
            conn: None,
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("connecting to {}:{}", self.host, self.port))?;
        let mut buf = BufStream::new(stream);
        read_reply(&mut buf).await?;
        write_command(&mut buf, &format!("EHLO {}", self.helo_name)).await?;
        read_multiline_reply(&mut buf).await?;
        self.conn = Some(buf);
        Ok(())
    }

    async fn reset_connection(&mut self) {
        self.conn = None;
    }
}

#[async_trait::async_trait]
impl SmtpClient for TcpSmtpClient {
    async fn submit(&mut self, envelope: Envelope<'_>) -> Result<Vec<RecipientRow>> {
        if let Err(e) = self.ensure_connected().await {
            tracing::warn!(host=%self.host, err=?e, "SMTP connect failed, all recipients delayed");
            return Ok(envelope
                .recipients
                .iter()
                .cloned()
                .map(|mut r| {
                    r.action = RecipientAction::Delayed;
                    r.status_text = format!("connection failed: {e}");
                    r
                })
                .collect());
        }

        let result = self.submit_on_open_connection(&envelope).await;
        match result {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::warn!(host=%self.host, err=?e, "SMTP submission failed, resetting connection");
                self.reset_connection().await;
                Ok(envelope
                    .recipients
                    .iter()
                    .cloned()
                    .map(|mut r| {
                        r.action = RecipientAction::Delayed;
                        r.status_text = format!("submission failed: {e}");
                        r
                    })
                    .collect())
            }
        }
    }
}

impl TcpSmtpClient {
    async fn submit_on_open_connection(
        &mut self,
        envelope: &Envelope<'_>,
    ) -> Result<Vec<RecipientRow>> {
        let buf = self.conn.as_mut().expect("connection just established");
        let sender = envelope.sender.unwrap_or("");

        write_command(buf, &format!("MAIL FROM:<{}>", sender)).await?;
        let reply = read_reply(buf).await?;
        if !reply.is_ok() {
            bail!("MAIL FROM rejected: {}", reply.text);
        }

        let mut out = Vec::with_capacity(envelope.recipients.len());
        for recipient in envelope.recipients {
            if recipient.action.is_terminal() {
                out.push(recipient.clone());
                continue;
            }
            write_command(buf, &format!("RCPT TO:<{}>", recipient.address)).await?;
            let reply = read_reply(buf).await?;
            let mut updated = recipient.clone();
            if reply.is_ok() {
                updated.action = RecipientAction::Relayed;
            } else if reply.is_permanent_failure() {
                updated.action = RecipientAction::Failed;
            } else {
                updated.action = RecipientAction::Delayed;
            }
            updated.status_text = reply.text;
            out.push(updated);
        }

        if !out.iter().any(|r| r.action == RecipientAction::Relayed) {
            write_command(buf, "RSET").await?;
            read_reply(buf).await?;
            return Ok(out);
        }

        write_command(buf, "DATA").await?;
        let reply = read_reply(buf).await?;
        if !reply.is_ok() {
            bail!("DATA rejected: {}", reply.text);
        }

        write_dot_stuffed_data(buf, envelope.message).await?;
        let reply = read_reply(buf).await?;

        for row in out.iter_mut() {
            if row.action != RecipientAction::Relayed {
                continue;
            }
            if reply.is_ok() {
                row.action = RecipientAction::Delivered;
                row.status_text = reply.text.clone();
            } else {
                row.action = RecipientAction::Failed;
                row.status_text = reply.text.clone();
            }
        }

        Ok(out)
    }
}

struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is_ok(&self) -> bool {
        self.code < 400
    }
    fn is_permanent_failure(&self) -> bool {
        self.code >= 500
    }
}

async fn write_command(buf: &mut BufStream<TcpStream>, cmd: &str) -> Result<()> {
    buf.write_all(cmd.as_bytes()).await?;
    buf.write_all(b"\r\n").await?;
    buf.flush().await?;
    Ok(())
}

async fn write_dot_stuffed_data(buf: &mut BufStream<TcpStream>, message: &[u8]) -> Result<()> {
    for line in message.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b".") {
            buf.write_all(b".").await?;
        }
        buf.write_all(line).await?;
        buf.write_all(b"\r\n").await?;
    }
    buf.write_all(b".\r\n").await?;
    buf.flush().await?;
    Ok(())
}

async fn read_reply(buf: &mut BufStream<TcpStream>) -> Result<Reply> {
    let mut line = String::new();
    buf.read_line(&mut line).await?;
    parse_reply_line(&line)
}

/// Reads a possibly multi-line reply (`250-...` continuation lines
/// until a final `250 ...`), used only for the EHLO greeting whose
/// capability lines this client otherwise ignores.
async fn read_multiline_reply(buf: &mut BufStream<TcpStream>) -> Result<Reply> {
    loop {
        let mut line = String::new();
        buf.read_line(&mut line).await?;
        let reply = parse_reply_line(&line)?;
        if line.as_bytes().get(3) != Some(&b'-') {
            return Ok(reply);
        }
    }
}

fn parse_reply_line(line: &str) -> Result<Reply> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.len() < 3 {
        bail!("malformed SMTP reply: {:?}", line);
    }
    let code: u16 = trimmed[..3].parse().context("malformed SMTP reply code")?;
    let text = trimmed.get(4..).unwrap_or("").to_string();
    Ok(Reply { code, text })
}

/// Connections grouped by `host:port`; `request()` hands back the first
/// idle client for that host or opens a fresh one.
#[derive(Default)]
pub struct SmtpClientPool {
    helo_name: String,
    idle: Mutex<HashMap<String, Vec<TcpSmtpClient>>>,
}

impl SmtpClientPool {
    pub fn new(helo_name: String) -> Arc<Self> {
        Arc::new(Self {
            helo_name,
            idle: Mutex::new(HashMap::new()),
        })
    }

    pub async fn checkout(&self, host: &str, port: u16) -> TcpSmtpClient {
        let key = format!("{host}:{port}");
        let mut idle = self.idle.lock().await;
        if let Some(clients) = idle.get_mut(&key) {
            if let Some(client) = clients.pop() {
                return client;
            }
        }
        TcpSmtpClient::new(host.to_string(), port, self.helo_name.clone())
    }

    pub async fn checkin(&self, host: &str, port: u16, client: TcpSmtpClient) {
        let key = format!("{host}:{port}");
        self.idle.lock().await.entry(key).or_default().push(client);
    }
}
