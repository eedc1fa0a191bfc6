//! A TCP socket wrapped for the relay's pump loops: pool-backed buffers on
//! the write path, an optional stream cipher applied on the way in or out,
//! and independent half-close so a pump ending in one direction doesn't
//! have to tear down the other.
//!
//! [`Connection::split`] hands out a [`ConnReader`] and a [`ConnWriter`]
//! that share the same socket through an `Arc`, the same pattern tokio's
//! own docs use for a single `TcpStream` driven by two tasks at once
//! instead of a `Mutex`-guarded duplex. Each half gets only the cipher
//! direction it needs, so there is no state a concurrent read and write
//! could race over.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::cipher::{Cipher, DecryptHalf, EncryptHalf};
use crate::pool::BufferPool;

pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Connection { stream }
    }

    /// Splits into a reader and a writer that share the underlying socket.
    /// `cipher`, if present, is itself split: its decrypt half goes to the
    /// reader, its encrypt half to the writer.
    pub fn split(self, pool: Arc<BufferPool>, cipher: Option<Cipher>) -> (ConnReader, ConnWriter) {
        let (decrypt, encrypt) = match cipher {
            Some(c) => {
                let (e, d) = c.into_halves();
                (Some(d), Some(e))
            }
            None => (None, None),
        };

        let (read_half, write_half) = self.stream.into_split();

        let reader = ConnReader {
            stream: read_half,
            decrypt,
        };
        let writer = ConnWriter {
            stream: write_half,
            pool,
            encrypt,
        };
        (reader, writer)
    }
}

pub struct ConnReader {
    stream: OwnedReadHalf,
    decrypt: Option<DecryptHalf>,
}

impl ConnReader {
    /// Reads into `buf`, decrypting in place when a cipher is attached.
    /// Returns `0` on EOF, same as the underlying socket.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf).await?;
        if let Some(decrypt) = &mut self.decrypt {
            decrypt.apply(&mut buf[..n]);
        }
        Ok(n)
    }

    /// Shuts down the local read side. This is local bookkeeping, not a
    /// signal to the peer — only `close_write` does that — so it is safe to
    /// call after a pump loop has already seen EOF or an error.
    pub fn close_read(&self) {
        shutdown_read(self.stream.as_ref());
    }
}

pub struct ConnWriter {
    stream: OwnedWriteHalf,
    pool: Arc<BufferPool>,
    encrypt: Option<EncryptHalf>,
}

impl ConnWriter {
    /// Writes all of `src`. When a cipher is attached, encrypts through a
    /// pool-acquired staging buffer sized to the pool's buffer size so the
    /// caller's slice is never mutated and large writes are chunked instead
    /// of allocating to fit.
    pub async fn write_all(&mut self, mut src: &[u8]) -> io::Result<usize> {
        let total = src.len();

        let encrypt = match &mut self.encrypt {
            Some(e) => e,
            None => {
                self.stream.write_all(src).await?;
                return Ok(total);
            }
        };

        let chunk_size = self.pool.buffer_size().max(1);
        while !src.is_empty() {
            let take = src.len().min(chunk_size);
            let mut staging = self.pool.acquire();
            staging.truncate(0);
            staging.extend_from_slice(&src[..take]);
            encrypt.apply(&mut staging);

            let result = self.stream.write_all(&staging).await;
            self.pool.release(staging);
            result?;

            src = &src[take..];
        }
        Ok(total)
    }

    /// Shuts down the write side, sending a FIN so the peer sees EOF on its
    /// next read. This is the half of half-close that actually reaches the
    /// other side.
    pub async fn close_write(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(&mut self.stream).await
    }
}

#[cfg(unix)]
fn shutdown_read(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: `stream.as_raw_fd()` is a valid, open socket for the lifetime
    // of this call; SHUT_RD affects only the local read side.
    unsafe {
        libc::shutdown(stream.as_raw_fd(), libc::SHUT_RD);
    }
}

#[cfg(not(unix))]
fn shutdown_read(_stream: &TcpStream) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherMethod;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plain_connection_round_trips_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let sock = TcpStream::connect(addr).await.unwrap();
            let pool = Arc::new(BufferPool::new(1024, 4));
            let (_r, mut w) = Connection::new(sock).split(pool, None);
            w.write_all(b"hello").await.unwrap();
        });

        let (sock, _) = listener.accept().await.unwrap();
        let pool = Arc::new(BufferPool::new(1024, 4));
        let (mut r, _w) = Connection::new(sock).split(pool, None);
        let mut buf = [0u8; 5];
        r.read(&mut buf).await.unwrap();
        client.await.unwrap();

        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn ciphered_write_is_decrypted_on_the_other_side() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let sock = TcpStream::connect(addr).await.unwrap();
            let pool = Arc::new(BufferPool::new(4, 4)); // smaller than payload, forces chunking
            let cipher = Cipher::new(CipherMethod::Rc4, b"secret");
            let (_r, mut w) = Connection::new(sock).split(pool, Some(cipher));
            w.write_all(b"a longer payload than one chunk").await.unwrap();
        });

        let (sock, _) = listener.accept().await.unwrap();
        let pool = Arc::new(BufferPool::new(4096, 4));
        let cipher = Cipher::new(CipherMethod::Rc4, b"secret");
        let (mut r, _w) = Connection::new(sock).split(pool, Some(cipher));
        let mut buf = [0u8; 64];
        let n = r.read(&mut buf).await.unwrap();
        client.await.unwrap();

        assert_eq!(&buf[..n], b"a longer payload than one chunk");
    }

    #[tokio::test]
    async fn close_write_propagates_eof_to_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let sock = TcpStream::connect(addr).await.unwrap();
            let pool = Arc::new(BufferPool::new(1024, 4));
            let (_r, mut w) = Connection::new(sock).split(pool, None);
            w.close_write().await.unwrap();
        });

        let (sock, _) = listener.accept().await.unwrap();
        let pool = Arc::new(BufferPool::new(1024, 4));
        let (mut r, _w) = Connection::new(sock).split(pool, None);
        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).await.unwrap();
        client.await.unwrap();

        assert_eq!(n, 0);
    }
}
