//! Link crypto: X25519 key agreement plus ChaCha20-Poly1305 frames.
//!
//! Each TCP link gets a pairwise key; each direction runs its own
//! [`FrameCipher`] with a 96-bit counter nonce, so nonces never repeat within
//! a link.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Link public key (32 bytes, X25519). Exchanged during the TCP handshake.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

/// Per-process X25519 keypair. The secret never leaves this struct.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Pairwise link key with the remote side's public key. Both ends derive
    /// the same value.
    pub fn link_key(&self, remote: &PublicKey) -> [u8; 32] {
        let shared = self
            .secret
            .diffie_hellman(&X25519PublicKey::from(remote.0))
            .to_bytes();
        let mut hasher = Sha256::new();
        hasher.update(b"share-link-v1");
        hasher.update(shared);
        hasher.finalize().into()
    }
}

/// One direction of an encrypted link. `seal` and `open` each consume the
/// next counter nonce; use a separate instance per direction and per role.
pub struct FrameCipher {
    cipher: ChaCha20Poly1305,
    nonce: u64,
}

impl FrameCipher {
    pub fn new(key: &[u8; 32]) -> Result<Self, WireCryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| WireCryptoError::Key)?;
        Ok(Self { cipher, nonce: 0 })
    }

    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, WireCryptoError> {
        let nonce = self.next_nonce();
        self.cipher
            .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| WireCryptoError::Seal)
    }

    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, WireCryptoError> {
        let nonce = self.next_nonce();
        self.cipher
            .decrypt(chacha20poly1305::Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| WireCryptoError::Open)
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[4..12].copy_from_slice(&self.nonce.to_le_bytes());
        self.nonce = self.nonce.saturating_add(1);
        bytes
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Seal,
    #[error("decryption failed")]
    Open,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_agreement_is_symmetric() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_eq!(a.link_key(b.public_key()), b.link_key(a.public_key()));
        let c = Keypair::generate();
        assert_ne!(a.link_key(b.public_key()), a.link_key(c.public_key()));
    }

    #[test]
    fn seal_open_stream() {
        let key = Keypair::generate().link_key(Keypair::generate().public_key());
        let mut tx = FrameCipher::new(&key).unwrap();
        let mut rx = FrameCipher::new(&key).unwrap();
        for i in 0..5u8 {
            let plain = vec![i; 100];
            let sealed = tx.seal(&plain).unwrap();
            assert_ne!(sealed, plain);
            assert_eq!(rx.open(&sealed).unwrap(), plain);
        }
    }

    #[test]
    fn tampering_is_detected() {
        let key = Keypair::generate().link_key(Keypair::generate().public_key());
        let mut tx = FrameCipher::new(&key).unwrap();
        let mut rx = FrameCipher::new(&key).unwrap();
        let mut sealed = tx.seal(b"photo bytes").unwrap();
        sealed[0] ^= 0xff;
        assert!(matches!(rx.open(&sealed), Err(WireCryptoError::Open)));
    }

    #[test]
    fn nonce_reuse_across_directions_is_harmless_to_decrypt() {
        // Two independent instances both start at nonce 0; they are used for
        // different directions so the streams stay consistent.
        let key = [7u8; 32];
        let mut a_tx = FrameCipher::new(&key).unwrap();
        let mut b_rx = FrameCipher::new(&key).unwrap();
        let sealed = a_tx.seal(b"first").unwrap();
        assert_eq!(b_rx.open(&sealed).unwrap(), b"first");
        // A second frame must use the next nonce or fail to open.
        let sealed2 = a_tx.seal(b"second").unwrap();
        assert_eq!(b_rx.open(&sealed2).unwrap(), b"second");
    }
}
