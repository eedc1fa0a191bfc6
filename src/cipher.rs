//! Stream cipher wiring for the relay's encrypted side.
//!
//! A [`Cipher`] holds two independent keystream states, one per direction,
//! both seeded from the same secret-derived key. Sharing a single keystream
//! across directions (or across sessions) would let an attacker XOR two
//! ciphertexts together and recover plaintext, so [`Cipher::new`] always
//! constructs the encrypt and decrypt sides separately.

use rc4::{Key, KeyInit, Rc4, StreamCipher};
use sha2::{Digest, Sha256};

type Rc4Key16 = Rc4<rc4::consts::U16>;

/// Names a supported stream cipher. `rc4` is the only built-in method; new
/// variants can be added here and in [`CipherMethod::parse`] without
/// touching [`Cipher`]'s callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMethod {
    Rc4,
}

impl CipherMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rc4" => Some(CipherMethod::Rc4),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherMethod::Rc4 => "rc4",
        }
    }
}

/// Derives a deterministic 16-byte key from the shared secret. Both peers
/// must run the same secret through the same digest to land on the same
/// key; there is no negotiation.
fn derive_key(secret: &[u8]) -> [u8; 16] {
    let digest = Sha256::digest(secret);
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

enum Keystream {
    Rc4(Box<Rc4Key16>),
}

impl Keystream {
    fn new(method: CipherMethod, key: &[u8; 16]) -> Self {
        match method {
            CipherMethod::Rc4 => {
                let key = Key::<rc4::consts::U16>::from_slice(key);
                Keystream::Rc4(Box::new(Rc4Key16::new(key)))
            }
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Rc4(state) => state.apply_keystream(buf),
        }
    }
}

/// A cipher instance bound to one session and one encrypted socket.
///
/// Each direction's keystream advances strictly with the bytes passed
/// through it and never rewinds; decrypting out of order (e.g. retrying a
/// chunk) will desynchronize the stream, matching the behavior of any RC4
/// based transport.
pub struct Cipher {
    method: CipherMethod,
    encrypt: Keystream,
    decrypt: Keystream,
}

impl Cipher {
    pub fn new(method: CipherMethod, secret: &[u8]) -> Self {
        let key = derive_key(secret);
        Cipher {
            method,
            encrypt: Keystream::new(method, &key),
            decrypt: Keystream::new(method, &key),
        }
    }

    pub fn method(&self) -> CipherMethod {
        self.method
    }

    /// Encrypts `buf` in place, advancing the encrypt-direction keystream.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.encrypt.apply(buf);
    }

    /// Decrypts `buf` in place, advancing the decrypt-direction keystream.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.decrypt.apply(buf);
    }

    /// Splits the cipher into its two independent directional halves so
    /// each can be handed to a different task: [`EncryptHalf`] to whichever
    /// pump writes the encrypted socket, [`DecryptHalf`] to whichever pump
    /// reads it. The two halves share no state after this point.
    pub fn into_halves(self) -> (EncryptHalf, DecryptHalf) {
        (EncryptHalf(self.encrypt), DecryptHalf(self.decrypt))
    }
}

/// The encrypt-direction half of a split [`Cipher`]; owned by a connection
/// writer.
pub struct EncryptHalf(Keystream);

impl EncryptHalf {
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply(buf);
    }
}

/// The decrypt-direction half of a split [`Cipher`]; owned by a connection
/// reader.
pub struct DecryptHalf(Keystream);

impl DecryptHalf {
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply(buf);
    }
}
