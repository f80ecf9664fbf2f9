//! IMAP over implicit TLS.
//!
//! Just enough of RFC 3501 for a read-only scan: LOGIN, SELECT, SEARCH,
//! FETCH, then CLOSE and LOGOUT when the session is dropped. Blocking I/O
//! on a rustls stream, same as the inbound mail poller this grew from.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::mailbox::{Mailbox, MessageId, SearchQuery};

/// Upper bound for a single literal in a server response.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// The TLS stream a real session runs on.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Open a TLS connection to the configured server, log in and select the
/// mailbox.
pub fn connect(config: &ScannerConfig) -> Result<ImapSession<TlsStream>> {
    let connection_err = |reason: String| ScanError::Connection {
        server: config.server.clone(),
        reason,
    };

    let addrs = (config.server.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| connection_err(format!("address lookup failed: {e}")))?;

    let mut last_err = None;
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                debug!(%addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    let tcp = tcp.ok_or_else(|| {
        connection_err(match last_err {
            Some(e) => e.to_string(),
            None => "no addresses resolved".to_string(),
        })
    })?;
    tcp.set_read_timeout(Some(config.timeout))
        .and_then(|()| tcp.set_write_timeout(Some(config.timeout)))
        .map_err(|e| connection_err(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| connection_err(format!("TLS setup failed: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    let server_name = ServerName::try_from(config.server.clone())
        .map_err(|e| connection_err(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| connection_err(format!("TLS setup failed: {e}")))?;
    let tls = rustls::StreamOwned::new(conn, tcp);

    ImapSession::open(
        tls,
        &config.server,
        &config.user,
        config.password.expose_secret(),
        &config.mailbox,
    )
}

/// Completion status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One logical response line with any literals it carried.
#[derive(Debug, Default)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// Untagged lines plus the tagged completion.
#[derive(Debug)]
struct Response {
    untagged: Vec<ResponseLine>,
    status: Status,
    text: String,
}

/// An authenticated IMAP session with a selected mailbox.
///
/// Dropping the session sends CLOSE and LOGOUT, ignoring failures. Once the
/// connection has failed nothing more is sent.
pub struct ImapSession<S: Read + Write = TlsStream> {
    stream: BufReader<S>,
    server: String,
    tag_counter: u32,
    selected: bool,
    released: bool,
    broken: bool,
}

impl<S: Read + Write> ImapSession<S> {
    /// Run the opening handshake over an established stream: greeting,
    /// LOGIN, SELECT.
    pub fn open(
        stream: S,
        server: &str,
        user: &str,
        password: &str,
        mailbox: &str,
    ) -> Result<Self> {
        let mut session = Self {
            stream: BufReader::new(stream),
            server: server.to_string(),
            tag_counter: 0,
            selected: false,
            released: false,
            broken: false,
        };

        session.read_greeting()?;
        session.login(user, password)?;
        session.select(mailbox)?;
        info!(server, mailbox, "Mailbox session opened");
        Ok(session)
    }

    fn read_greeting(&mut self) -> Result<()> {
        let line = self.read_line()?;
        let upper = line.text.to_ascii_uppercase();
        if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(self.connection_error(format!("server refused session: {}", line.text)))
        }
    }

    fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let args = format!("{} {}", quoted("LOGIN", user)?, quoted("LOGIN", password)?);
        let resp = self.command("LOGIN", &args)?;
        if resp.status != Status::Ok {
            return Err(ScanError::Authentication {
                user: user.to_string(),
                reason: resp.text,
            });
        }
        Ok(())
    }

    fn select(&mut self, mailbox: &str) -> Result<()> {
        let resp = self.command("SELECT", &quoted("SELECT", mailbox)?)?;
        expect_ok("SELECT", &resp)?;
        self.selected = true;
        Ok(())
    }

    /// `SEARCH (SINCE "dd-Mon-yyyy") (FROM "sender")`.
    pub fn search(&mut self, query: &SearchQuery) -> Result<Vec<MessageId>> {
        let args = format!(
            "(SINCE {}) (FROM {})",
            quoted("SEARCH", &query.imap_since())?,
            quoted("SEARCH", &query.sender)?
        );
        let resp = self.command("SEARCH", &args)?;
        expect_ok("SEARCH", &resp)?;

        let mut ids = Vec::new();
        for line in &resp.untagged {
            let mut tokens = line.text.split_ascii_whitespace();
            if tokens.next() != Some("*")
                || !tokens.next().is_some_and(|t| t.eq_ignore_ascii_case("SEARCH"))
            {
                continue;
            }
            for token in tokens {
                if !token.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ScanError::protocol(
                        "SEARCH",
                        format!("unexpected token in result: {token}"),
                    ));
                }
                ids.push(MessageId::new(token));
            }
        }
        debug!(
            count = ids.len(),
            since = %query.since,
            sender = %query.sender,
            "Search complete"
        );
        Ok(ids)
    }

    /// `FETCH <id> (RFC822)`, returning the message literal.
    pub fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>> {
        if id.as_str().is_empty() || !id.as_str().bytes().all(|b| b.is_ascii_digit()) {
            return Err(ScanError::protocol("FETCH", format!("invalid message id: {id}")));
        }
        let resp = self.command("FETCH", &format!("{id} (RFC822)"))?;
        expect_ok("FETCH", &resp)?;

        resp.untagged
            .into_iter()
            .filter(|line| line.text.to_ascii_uppercase().contains("FETCH"))
            .find_map(|line| line.literals.into_iter().next())
            .ok_or_else(|| {
                ScanError::protocol("FETCH", format!("no message body returned for {id}"))
            })
    }

    fn release(&mut self) {
        if self.released || self.broken {
            return;
        }
        self.released = true;
        if self.selected
            && let Err(e) = self.command("CLOSE", "")
        {
            debug!(error = %e, "CLOSE failed during release");
        }
        match self.command("LOGOUT", "") {
            Ok(_) => debug!(server = %self.server, "Logged out"),
            Err(e) => warn!(server = %self.server, error = %e, "LOGOUT failed"),
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    /// Send one tagged command and read until its completion.
    fn command(&mut self, name: &str, args: &str) -> Result<Response> {
        let tag = self.next_tag();
        let line = if args.is_empty() {
            format!("{tag} {name}\r\n")
        } else {
            format!("{tag} {name} {args}\r\n")
        };
        debug!(%tag, command = name, "IMAP command");

        let stream = self.stream.get_mut();
        if let Err(e) = stream.write_all(line.as_bytes()).and_then(|()| stream.flush()) {
            return Err(self.connection_error(e.to_string()));
        }
        self.read_response(name, &tag)
    }

    fn read_response(&mut self, command: &str, tag: &str) -> Result<Response> {
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            let completion = line
                .text
                .strip_prefix(tag)
                .and_then(|r| r.strip_prefix(' '))
                .map(str::to_string);
            let Some(rest) = completion else {
                untagged.push(line);
                continue;
            };

            let (word, text) = rest.split_once(' ').unwrap_or((rest.as_str(), ""));
            let status = match word.to_ascii_uppercase().as_str() {
                "OK" => Status::Ok,
                "NO" => Status::No,
                "BAD" => Status::Bad,
                other => {
                    return Err(ScanError::protocol(
                        command,
                        format!("unknown completion status: {other}"),
                    ));
                }
            };
            return Ok(Response {
                untagged,
                status,
                text: text.trim().to_string(),
            });
        }
    }

    /// Read one logical line, pulling in `{n}` literals as they appear.
    fn read_line(&mut self) -> Result<ResponseLine> {
        let mut line = ResponseLine::default();
        loop {
            let mut buf = Vec::new();
            let n = match self.stream.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) => return Err(self.connection_error(e.to_string())),
            };
            if n == 0 {
                return Err(self.connection_error("connection closed by server".to_string()));
            }
            let chunk = String::from_utf8_lossy(&buf);
            let chunk = chunk.trim_end_matches(['\r', '\n']);
            line.text.push_str(chunk);

            let size = match literal_size(chunk) {
                Ok(Some(size)) => size,
                Ok(None) => return Ok(line),
                Err(e) => {
                    // The rest of the literal is still on the wire.
                    self.broken = true;
                    return Err(e);
                }
            };
            let mut literal = vec![0u8; size];
            if let Err(e) = self.stream.read_exact(&mut literal) {
                return Err(self.connection_error(e.to_string()));
            }
            line.literals.push(literal);
        }
    }

    fn connection_error(&mut self, reason: String) -> ScanError {
        self.broken = true;
        ScanError::Connection {
            server: self.server.clone(),
            reason,
        }
    }
}

impl<S: Read + Write> Mailbox for ImapSession<S> {
    fn search(&mut self, query: &SearchQuery) -> Result<Vec<MessageId>> {
        ImapSession::search(self, query)
    }

    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>> {
        ImapSession::fetch(self, id)
    }
}

impl<S: Read + Write> Drop for ImapSession<S> {
    fn drop(&mut self) {
        self.release();
    }
}

fn expect_ok(command: &str, resp: &Response) -> Result<()> {
    match resp.status {
        Status::Ok => Ok(()),
        Status::No | Status::Bad => Err(ScanError::protocol(command, resp.text.clone())),
    }
}

/// IMAP quoted string. Line breaks cannot be quoted.
fn quoted(command: &str, value: &str) -> Result<String> {
    if value.contains(['\r', '\n']) {
        return Err(ScanError::protocol(command, "argument contains a line break"));
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    Ok(out)
}

/// Size of the literal announced at the end of `chunk`, if any.
fn literal_size(chunk: &str) -> Result<Option<usize>> {
    let Some(body) = chunk.strip_suffix('}') else {
        return Ok(None);
    };
    let Some(open) = body.rfind('{') else {
        return Ok(None);
    };
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let size: usize = digits
        .parse()
        .map_err(|_| ScanError::protocol("read", format!("literal size out of range: {digits}")))?;
    if size > MAX_LITERAL_BYTES {
        return Err(ScanError::protocol(
            "read",
            format!("literal of {size} bytes exceeds limit"),
        ));
    }
    Ok(Some(size))
}
