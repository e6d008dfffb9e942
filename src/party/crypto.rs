// Symmetric encrypt/decrypt for peer datagrams.
//
// Single wire format, used identically by every peer: a keyed stream XOR
// plus a 16-byte keyed checksum. No "with/without crypto" negotiation and
// no AEAD fallback branch - the host application's Python original shipped
// two divergent crypto implementations (one keyed-XOR, one
// AESGCM-if-available) that silently failed to interoperate when only one
// side had the optional library installed. This is the single format both
// sides agree on. Swapping in a real AEAD primitive is fine as long as
// every peer in the deployment does it together.

use rand::RngCore;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

#[derive(Debug)]
pub enum CryptoError {
  Short,
  Tamper,
}

impl std::fmt::Display for CryptoError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Short => write!(f, "encrypted payload shorter than nonce + tag"),
      Self::Tamper => write!(f, "checksum mismatch, payload rejected"),
    }
  }
}

impl std::error::Error for CryptoError {}

#[derive(Clone)]
pub struct Crypto {
  key: [u8; KEY_SIZE],
}

impl Crypto {
  pub fn new(key: [u8; KEY_SIZE]) -> Self {
    Self { key }
  }

  pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
  }

  /// `nonce(12) || ciphertext(len(plaintext)) || tag(16)`.
  pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = self.xor_cipher(plaintext, &nonce);
    let tag = self.keyed_checksum(plaintext);

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len() + TAG_SIZE);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    out
  }

  pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
      return Err(CryptoError::Short);
    }

    let nonce = &data[..NONCE_SIZE];
    let ciphertext = &data[NONCE_SIZE..data.len() - TAG_SIZE];
    let tag = &data[data.len() - TAG_SIZE..];

    let plaintext = self.xor_cipher(ciphertext, nonce);
    let expected_tag = self.keyed_checksum(&plaintext);

    if tag != expected_tag.as_slice() {
      return Err(CryptoError::Tamper);
    }

    Ok(plaintext)
  }

  fn xor_cipher(&self, data: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut keystream = Vec::with_capacity(self.key.len() + nonce.len());
    keystream.extend_from_slice(&self.key);
    keystream.extend_from_slice(nonce);

    data
      .iter()
      .enumerate()
      .map(|(i, b)| b ^ keystream[i % keystream.len()])
      .collect()
  }

  fn keyed_checksum(&self, data: &[u8]) -> [u8; TAG_SIZE] {
    let mut checksum: u32 = 0;
    for (i, byte) in data.iter().enumerate() {
      checksum ^= u32::from(*byte) ^ u32::from(self.key[i % self.key.len()]);
      checksum = checksum.rotate_left(1);
    }

    let mut tag = [0u8; TAG_SIZE];
    tag[0..4].copy_from_slice(&checksum.to_be_bytes());
    tag[4..8].copy_from_slice(&(checksum ^ 0xDEAD_BEEF).to_be_bytes());
    tag[8..12].copy_from_slice(&(checksum ^ 0xCAFE_BABE).to_be_bytes());
    tag[12..16].copy_from_slice(&(checksum ^ 0x1234_5678).to_be_bytes());
    tag
  }
}

/// Combine two half-keys into a shared key. Commutative: `derive(a, b) == derive(b, a)`.
pub fn derive_shared_key(my: &[u8; KEY_SIZE], peer: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
  let mut shared = [0u8; KEY_SIZE];
  for i in 0..KEY_SIZE {
    shared[i] = my[i] ^ peer[i];
  }

  // Position-mixing pass to avoid an all-zero result when the halves match.
  for i in 0..KEY_SIZE {
    shared[i] = shared[i].wrapping_add(i as u8).wrapping_add(0x5A);
  }
  let mixed = shared;
  for i in 0..KEY_SIZE {
    shared[i] = mixed[i] ^ mixed[(i + 1) % KEY_SIZE];
  }

  shared
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_plaintext() {
    let key = Crypto::generate_key();
    let crypto = Crypto::new(key);
    let msg = b"hello party";

    let encrypted = crypto.encrypt(msg);
    let decrypted = crypto.decrypt(&encrypted).unwrap();

    assert_eq!(decrypted, msg);
  }

  #[test]
  fn rejects_flipped_bit() {
    let key = Crypto::generate_key();
    let crypto = Crypto::new(key);
    let mut encrypted = crypto.encrypt(b"hello party");

    let last = encrypted.len() - 1;
    encrypted[last] ^= 0x01;

    assert!(matches!(crypto.decrypt(&encrypted), Err(CryptoError::Tamper)));
  }

  #[test]
  fn rejects_short_payload() {
    let key = Crypto::generate_key();
    let crypto = Crypto::new(key);
    assert!(matches!(crypto.decrypt(&[0u8; 4]), Err(CryptoError::Short)));
  }

  #[test]
  fn key_derivation_is_commutative() {
    let a = Crypto::generate_key();
    let b = Crypto::generate_key();
    assert_eq!(derive_shared_key(&a, &b), derive_shared_key(&b, &a));
  }

  #[test]
  fn key_derivation_avoids_all_zero_for_matching_halves() {
    let a = [7u8; KEY_SIZE];
    let derived = derive_shared_key(&a, &a);
    assert_ne!(derived, [0u8; KEY_SIZE]);
  }
}
