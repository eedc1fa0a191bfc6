//! First-packet host inspection for client-mode sessions.
//!
//! Peeks the start of a freshly accepted connection far enough to find a
//! destination host, without losing a single byte of what it peeked — every
//! byte read here is handed back as the preamble so the upstream sees
//! exactly what the client sent.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;

use crate::hostlist::{normalize_host, HostList};

/// Lines longer than this are treated as "too long to fit the reader's
/// buffer" and end inspection early, same as the original tunnel's
/// fixed-size line reader. This is an upper bound on how much a single
/// line scan will ever buffer, not just a post-hoc check.
const MAX_LINE_LEN: usize = 8192;

pub struct Inspection {
    /// `true` routes through the encrypted backend path.
    pub on_list: bool,
    /// Registered-domain-normalized host, or empty if none was found.
    pub host: String,
    /// Every byte consumed while inspecting — must be replayed to upstream
    /// unmodified as the session's first write.
    pub preamble: Vec<u8>,
    /// The socket, handed back so the caller can build a session out of it.
    pub stream: TcpStream,
}

/// Reads the request head from `stream`, classifies the destination host
/// against `host_list`, and returns the socket along with everything that
/// was read off it.
pub async fn inspect(stream: TcpStream, host_list: &HostList, inspect_ceiling: usize) -> Inspection {
    let mut reader = BufReader::new(stream);
    let mut preamble = Vec::new();
    let mut host = String::new();
    let mut first_line = true;

    loop {
        let (line, too_long) = match read_line_bounded(&mut reader, MAX_LINE_LEN).await {
            Ok(result) => result,
            Err(_) => break,
        };
        if line.is_empty() {
            break;
        }

        preamble.extend_from_slice(&line);
        let trimmed = trim_crlf(&line);

        if first_line {
            first_line = false;
            if let Some(found) = extract_request_line_host(trimmed) {
                host = found;
                break;
            }
        } else if let Some(found) = extract_host_header(trimmed) {
            host = found;
            break;
        }

        if too_long {
            break;
        }
    }

    // One bounded read beyond the header, appended unconditionally: this is
    // the start of the body/next request that the relay cannot seek back
    // for, so it must ride along in the preamble regardless of whether a
    // host was found.
    let mut tail = vec![0u8; inspect_ceiling];
    if let Ok(n) = reader.read(&mut tail).await {
        tail.truncate(n);
        preamble.extend_from_slice(&tail);
    }

    let stream = reader.into_inner();
    let host = normalize_host(&host);
    let on_list = host_list.classify(&host);

    Inspection {
        on_list,
        host,
        preamble,
        stream,
    }
}

/// Reads one line (through and including `\n`) from `reader`, never
/// buffering more than `cap` bytes into the returned `Vec` regardless of
/// how much non-newline-terminated data the peer sends — the cap is
/// enforced on each chunk as it arrives via `fill_buf`/`consume`, not after
/// the fact. Returns the bytes read (empty on EOF) and whether the cap was
/// hit before a newline was found.
async fn read_line_bounded(
    reader: &mut BufReader<TcpStream>,
    cap: usize,
) -> io::Result<(Vec<u8>, bool)> {
    let mut line = Vec::new();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok((line, false));
        }

        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            let remaining_cap = cap - line.len();
            let too_long = pos + 1 > remaining_cap;
            let take = (pos + 1).min(remaining_cap);
            line.extend_from_slice(&chunk[..take]);
            reader.consume(pos + 1);
            return Ok((line, too_long));
        }

        let remaining_cap = cap - line.len();
        if chunk.len() >= remaining_cap {
            line.extend_from_slice(&chunk[..remaining_cap]);
            reader.consume(remaining_cap);
            return Ok((line, true));
        }

        let consumed = chunk.len();
        line.extend_from_slice(chunk);
        reader.consume(consumed);
    }
}

fn trim_crlf(line: &[u8]) -> &str {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    std::str::from_utf8(&line[..end]).unwrap_or("")
}

/// If `line` is a request line whose second token is an absolute URL
/// (`http://host/path`), returns the authority component.
fn extract_request_line_host(line: &str) -> Option<String> {
    let token = line.split_whitespace().nth(1)?;
    if !token.starts_with("http") {
        return None;
    }
    let after_scheme = &token[token.find("://")? + 3..];
    let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
    let authority = &after_scheme[..authority_end];
    if authority.is_empty() {
        None
    } else {
        Some(authority.to_string())
    }
}

/// If `line` is a `Host: value` header (case-insensitive name), returns the
/// trimmed value.
fn extract_host_header(line: &str) -> Option<String> {
    let (name, value) = line.split_once(':')?;
    if name.trim().eq_ignore_ascii_case("host") {
        Some(value.trim().to_string())
    } else {
        None
    }
}
