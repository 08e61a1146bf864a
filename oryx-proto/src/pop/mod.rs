//! POP3 (RFC 1939) with CAPA (RFC 2449), STLS (RFC 2595) and AUTH
//! PLAIN (RFC 5034/4616). Grounded on the teacher's `aero-proto::sasl`
//! connection loop shape (buffered line reads over a `watch`-driven
//! accept loop) and `aero-proto::imap::mod` for the TLS/STARTTLS
//! pattern; the command surface itself is new, since the teacher never
//! implemented POP3. Message-number assignment and the DELE/RSET/QUIT
//! Update-state semantics follow spec.md §6 "POP wire".

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use futures::stream::{FuturesUnordered, StreamExt};
use imap_flow::stream::AnyStream;
use rustls_pemfile::{certs, private_key};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use oryx_mail::{Database, Mailbox, UniqueIdent};
use oryx_user::config::PopConfig;
use oryx_user::login::ArcLoginProvider;

pub struct Server {
    bind_addr: SocketAddr,
    login_provider: ArcLoginProvider,
    db: Arc<dyn Database>,
    tls: Option<TlsAcceptor>,
}

pub fn new(config: PopConfig, login: ArcLoginProvider, db: Arc<dyn Database>) -> Result<Server> {
    let tls = match (config.certs, config.key) {
        (Some(certs_path), Some(key_path)) => {
            let loaded_certs = certs(&mut std::io::BufReader::new(std::fs::File::open(
                certs_path,
            )?))
            .collect::<Result<Vec<_>, _>>()?;
            let loaded_key = private_key(&mut std::io::BufReader::new(std::fs::File::open(
                key_path,
            )?))?
            .ok_or_else(|| anyhow!("no private key found"))?;
            let tls_config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(loaded_certs, loaded_key)?;
            Some(TlsAcceptor::from(Arc::new(tls_config)))
        }
        _ => None,
    };

    Ok(Server {
        bind_addr: config.bind_addr,
        login_provider: login,
        db,
        tls,
    })
}

impl Server {
    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("POP3 server listening on {:#}", self.bind_addr);

        let mut connections = FuturesUnordered::new();

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!("POP3: accepted connection from {}", remote_addr);

            let conn = tokio::spawn(
                Session::new(
                    remote_addr,
                    AnyStream::new(socket),
                    self.login_provider.clone(),
                    self.db.clone(),
                    self.tls.clone(),
                    must_exit.clone(),
                )
                .run_logged(),
            );
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("POP3 server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}

/// Message numbers are assigned once, on entry into the Transaction
/// state, and never change for the lifetime of the session (RFC 1939
/// §5) even as `DELE` logically removes messages from view.
struct Listing {
    by_number: BTreeMap<u32, UniqueIdent>,
    sizes: BTreeMap<UniqueIdent, u32>,
}

enum State {
    Authorization { user: Option<String> },
    Transaction {
        username: String,
        mailbox: Arc<Mailbox>,
        listing: Listing,
        marked_deleted: std::collections::HashSet<UniqueIdent>,
    },
    Update,
}

struct Session {
    addr: SocketAddr,
    login_provider: ArcLoginProvider,
    db: Arc<dyn Database>,
    tls: Option<TlsAcceptor>,
    stop: watch::Receiver<bool>,
    stream: BufStream<AnyStream>,
    state: State,
}

impl Session {
    fn new(
        addr: SocketAddr,
        stream: AnyStream,
        login_provider: ArcLoginProvider,
        db: Arc<dyn Database>,
        tls: Option<TlsAcceptor>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            addr,
            login_provider,
            db,
            tls,
            stop,
            stream: BufStream::new(stream),
            state: State::Authorization { user: None },
        }
    }

    async fn run_logged(mut self) {
        if let Err(e) = self.greet().await {
            tracing::error!(addr=%self.addr, err=?e, "POP3 greeting failed");
            return;
        }
        match self.run().await {
            Ok(()) => tracing::info!(addr=%self.addr, "POP3 session closed"),
            Err(e) => tracing::error!(addr=%self.addr, err=?e, "POP3 session failed"),
        }
    }

    async fn greet(&mut self) -> Result<()> {
        self.stream.write_all(b"+OK Aerogramme POP3 ready\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                read_res = self.stream.read_line(&mut line) => {
                    let bread = read_res?;
                    if bread == 0 {
                        return Ok(());
                    }
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if self.dispatch(&line).await? {
                        return Ok(());
                    }
                },
                _ = self.stop.changed() => {
                    let _ = self.stream.write_all(b"-ERR server is shutting down\r\n").await;
                    return Ok(());
                }
            }
        }
    }

    /// Returns `Ok(true)` once the session should close (after `QUIT`).
    async fn dispatch(&mut self, line: &str) -> Result<bool> {
        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().unwrap_or("").to_ascii_uppercase();
        let rest = parts.next().unwrap_or("").trim();

        match verb.as_str() {
            "CAPA" => self.capa().await?,
            "QUIT" => return self.quit().await.map(|_| true),
            "STLS" => self.stls().await?,
            "USER" => self.user(rest).await?,
            "PASS" => self.pass(rest).await?,
            "AUTH" => self.auth(rest).await?,
            "STAT" => self.stat().await?,
            "LIST" => self.list(rest).await?,
            "UIDL" => self.uidl(rest).await?,
            "RETR" => self.retr(rest).await?,
            "TOP" => self.top(rest).await?,
            "DELE" => self.dele(rest).await?,
            "RSET" => self.rset().await?,
            "NOOP" => self.reply_ok("").await?,
            _ => self.reply_err("unknown command").await?,
        }
        Ok(false)
    }

    async fn reply_ok(&mut self, msg: &str) -> Result<()> {
        if msg.is_empty() {
            self.stream.write_all(b"+OK\r\n").await?;
        } else {
            self.stream.write_all(format!("+OK {}\r\n", msg).as_bytes()).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn reply_err(&mut self, msg: &str) -> Result<()> {
        self.stream.write_all(format!("-ERR {}\r\n", msg).as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn capa(&mut self) -> Result<()> {
        self.stream.write_all(b"+OK Capability list follows\r\n").await?;
        self.stream.write_all(b"USER\r\n").await?;
        self.stream.write_all(b"UIDL\r\n").await?;
        self.stream.write_all(b"TOP\r\n").await?;
        self.stream.write_all(b"SASL PLAIN\r\n").await?;
        if self.tls.is_some() {
            self.stream.write_all(b"STLS\r\n").await?;
        }
        self.stream.write_all(b"RESP-CODES\r\n").await?;
        self.stream.write_all(b"PIPELINING\r\n").await?;
        self.stream.write_all(b".\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn stls(&mut self) -> Result<()> {
        if !matches!(self.state, State::Authorization { .. }) {
            return self.reply_err("STLS only allowed before authentication").await;
        }
        let acceptor = match &self.tls {
            Some(a) => a.clone(),
            None => return self.reply_err("STLS not available").await,
        };
        self.reply_ok("Begin TLS negotiation").await?;

        // RFC 2595: any buffered plaintext past this point must be
        // discarded; the client is required to wait for the +OK
        // before sending the TLS ClientHello.
        let plain = self.stream.into_inner();
        let tls_stream = acceptor.accept(plain).await.context("TLS handshake failed")?;
        self.stream = BufStream::new(AnyStream::new(tls_stream));
        Ok(())
    }

    async fn user(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return self.reply_err("missing username").await;
        }
        match &mut self.state {
            State::Authorization { user } => {
                *user = Some(name.to_string());
                self.reply_ok("send PASS").await
            }
            _ => self.reply_err("already authenticated").await,
        }
    }

    async fn pass(&mut self, password: &str) -> Result<()> {
        let username = match &self.state {
            State::Authorization { user: Some(u) } => u.clone(),
            State::Authorization { user: None } => {
                return self.reply_err("USER required first").await
            }
            _ => return self.reply_err("already authenticated").await,
        };
        self.authenticate(username, password.to_string()).await
    }

    async fn auth(&mut self, rest: &str) -> Result<()> {
        let mut parts = rest.splitn(2, ' ');
        let mech = parts.next().unwrap_or("").to_ascii_uppercase();
        if mech != "PLAIN" {
            return self.reply_err("unsupported SASL mechanism").await;
        }

        let b64 = match parts.next() {
            Some(initial) if !initial.is_empty() => initial.to_string(),
            _ => {
                self.stream.write_all(b"+ \r\n").await?;
                self.stream.flush().await?;
                let mut line = String::new();
                self.stream.read_line(&mut line).await?;
                line.trim_end_matches(['\r', '\n']).to_string()
            }
        };

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .context("invalid base64")?;
        let mut fields = decoded.split(|b| *b == 0);
        let _authzid = fields.next();
        let authcid = fields
            .next()
            .ok_or_else(|| anyhow!("malformed SASL PLAIN response"))?;
        let passwd = fields
            .next()
            .ok_or_else(|| anyhow!("malformed SASL PLAIN response"))?;

        let username = String::from_utf8(authcid.to_vec()).context("non-utf8 username")?;
        let password = String::from_utf8(passwd.to_vec()).context("non-utf8 password")?;
        self.authenticate(username, password).await
    }

    async fn authenticate(&mut self, username: String, password: String) -> Result<()> {
        if !matches!(self.state, State::Authorization { .. }) {
            return self.reply_err("already authenticated").await;
        }

        let creds = match self.login_provider.login(&username, &password).await {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(err=?e, "POP3 authentication failed");
                return self.reply_err("authentication failed").await;
            }
        };

        let user = crate::user::User::new(creds, self.db.clone()).await?;
        let mailbox = match user.open_mailbox(oryx_mail::INBOX).await? {
            Some(mb) => mb,
            None => bail!("account has no INBOX"),
        };
        mailbox.force_sync().await?;

        let index = mailbox.current_uid_index().await;
        let mut by_number = BTreeMap::new();
        let mut sizes = BTreeMap::new();
        for (n, (_, id)) in index.idx_by_uid.iter().enumerate() {
            by_number.insert(n as u32 + 1, *id);
            let meta = mailbox.fetch_meta(*id).await?;
            sizes.insert(*id, meta.rfc822_size as u32);
        }

        self.state = State::Transaction {
            username,
            mailbox,
            listing: Listing { by_number, sizes },
            marked_deleted: std::collections::HashSet::new(),
        };
        self.reply_ok("Logged in").await
    }

    fn transaction(&mut self) -> Result<(&Listing, &std::collections::HashSet<UniqueIdent>, &Arc<Mailbox>)> {
        match &self.state {
            State::Transaction { listing, marked_deleted, mailbox, .. } => {
                Ok((listing, marked_deleted, mailbox))
            }
            _ => bail!("command requires an authenticated session"),
        }
    }

    fn resolve(&mut self, num_str: &str) -> Result<(u32, UniqueIdent)> {
        let (listing, marked_deleted, _) = self.transaction()?;
        let num: u32 = num_str.trim().parse().context("invalid message number")?;
        let id = *listing
            .by_number
            .get(&num)
            .ok_or_else(|| anyhow!("no such message"))?;
        if marked_deleted.contains(&id) {
            bail!("message {} already deleted", num);
        }
        Ok((num, id))
    }

    async fn stat(&mut self) -> Result<()> {
        let (listing, marked_deleted, _) = match self.transaction() {
            Ok(v) => v,
            Err(e) => return self.reply_err(&e.to_string()).await,
        };
        let (count, total): (u32, u64) = listing
            .by_number
            .values()
            .filter(|id| !marked_deleted.contains(*id))
            .fold((0, 0), |(c, t), id| {
                (c + 1, t + *listing.sizes.get(id).unwrap_or(&0) as u64)
            });
        self.reply_ok(&format!("{} {}", count, total)).await
    }

    async fn list(&mut self, rest: &str) -> Result<()> {
        if !rest.is_empty() {
            let resolved = self.resolve(rest);
            return match resolved {
                Ok((num, id)) => {
                    let (listing, _, _) = self.transaction()?;
                    let size = *listing.sizes.get(&id).unwrap_or(&0);
                    self.reply_ok(&format!("{} {}", num, size)).await
                }
                Err(e) => self.reply_err(&e.to_string()).await,
            };
        }

        let (listing, marked_deleted, _) = match self.transaction() {
            Ok(v) => v,
            Err(e) => return self.reply_err(&e.to_string()).await,
        };
        let lines: Vec<String> = listing
            .by_number
            .iter()
            .filter(|(_, id)| !marked_deleted.contains(*id))
            .map(|(n, id)| format!("{} {}", n, listing.sizes.get(id).unwrap_or(&0)))
            .collect();

        self.stream.write_all(b"+OK scan listing follows\r\n").await?;
        for l in lines {
            self.stream.write_all(l.as_bytes()).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.write_all(b".\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn uidl(&mut self, rest: &str) -> Result<()> {
        if !rest.is_empty() {
            let resolved = self.resolve(rest);
            return match resolved {
                Ok((num, id)) => self.reply_ok(&format!("{} {}", num, id)).await,
                Err(e) => self.reply_err(&e.to_string()).await,
            };
        }

        let (listing, marked_deleted, _) = match self.transaction() {
            Ok(v) => v,
            Err(e) => return self.reply_err(&e.to_string()).await,
        };
        let lines: Vec<String> = listing
            .by_number
            .iter()
            .filter(|(_, id)| !marked_deleted.contains(*id))
            .map(|(n, id)| format!("{} {}", n, id))
            .collect();

        self.stream.write_all(b"+OK unique-id listing follows\r\n").await?;
        for l in lines {
            self.stream.write_all(l.as_bytes()).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.write_all(b".\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn retr(&mut self, rest: &str) -> Result<()> {
        let (_, id) = match self.resolve(rest) {
            Ok(v) => v,
            Err(e) => return self.reply_err(&e.to_string()).await,
        };
        let (_, _, mailbox) = self.transaction()?;
        let body = mailbox.fetch_full(id).await?;

        self.stream
            .write_all(format!("+OK {} octets\r\n", body.len()).as_bytes())
            .await?;
        write_dot_stuffed(&mut self.stream, &body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn top(&mut self, rest: &str) -> Result<()> {
        let mut parts = rest.splitn(2, ' ');
        let num_str = parts.next().unwrap_or("");
        let nlines: usize = match parts.next().unwrap_or("0").trim().parse() {
            Ok(n) => n,
            Err(_) => return self.reply_err("invalid line count").await,
        };

        let (_, id) = match self.resolve(num_str) {
            Ok(v) => v,
            Err(e) => return self.reply_err(&e.to_string()).await,
        };
        let (_, _, mailbox) = self.transaction()?;
        let body = mailbox.fetch_full(id).await?;

        let (headers, after_headers) = split_header_block(&body);
        let extra_lines = after_headers
            .split(|&b| b == b'\n')
            .take(nlines)
            .collect::<Vec<_>>()
            .join(&b'\n');

        self.reply_ok("top of message follows").await?;
        write_dot_stuffed(&mut self.stream, headers).await?;
        self.stream.write_all(b"\r\n").await?;
        write_dot_stuffed(&mut self.stream, &extra_lines).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn dele(&mut self, rest: &str) -> Result<()> {
        let resolved = self.resolve(rest);
        match resolved {
            Ok((_, id)) => {
                if let State::Transaction { marked_deleted, .. } = &mut self.state {
                    marked_deleted.insert(id);
                }
                self.reply_ok("message marked for deletion").await
            }
            Err(e) => self.reply_err(&e.to_string()).await,
        }
    }

    async fn rset(&mut self) -> Result<()> {
        match &mut self.state {
            State::Transaction { marked_deleted, .. } => {
                marked_deleted.clear();
                self.reply_ok("").await
            }
            _ => self.reply_err("not in transaction state").await,
        }
    }

    /// `QUIT` during Transaction performs the Update per RFC 1939 §6:
    /// every marked message still present is expunged, and a failure
    /// partway through leaves the already-deleted messages deleted.
    async fn quit(&mut self) -> Result<()> {
        let prev = std::mem::replace(&mut self.state, State::Update);
        if let State::Transaction { mailbox, marked_deleted, .. } = prev {
            for id in marked_deleted {
                if let Err(e) = mailbox.delete(id).await {
                    tracing::warn!(err=?e, id=?id, "failed to expunge message during POP3 QUIT");
                }
            }
        }
        self.reply_ok("Aerogramme POP3 signing off").await
    }
}

async fn write_dot_stuffed(stream: &mut BufStream<AnyStream>, data: &[u8]) -> Result<()> {
    for line in data.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b".") {
            stream.write_all(b".").await?;
        }
        stream.write_all(line).await?;
        stream.write_all(b"\r\n").await?;
    }
    stream.write_all(b".\r\n").await?;
    Ok(())
}

fn split_header_block(body: &[u8]) -> (&[u8], &[u8]) {
    let needle = b"\r\n\r\n";
    match body.windows(4).position(|w| w == needle) {
        Some(pos) => (&body[..pos], &body[pos + 4..]),
        None => (body, &[]),
    }
}
