/*!
Crypto things

Provider tokens are stored encrypted with AES_256_GCM. Every value gets
its own random 12 byte nonce, and both are stored together, hex encoded,
as `<nonce>.<ciphertext>`.
*/
use ring::aead::BoundKey;

use crate::{Error, Result};

/// Hands ring's bound keys a single nonce; any second use fails.
struct OneNonceSequence {
    inner: Option<ring::aead::Nonce>,
}
impl OneNonceSequence {
    fn new(inner: ring::aead::Nonce) -> Self {
        Self { inner: Some(inner) }
    }
}

impl ring::aead::NonceSequence for OneNonceSequence {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.inner.take().ok_or(ring::error::Unspecified)
    }
}

fn crypto_error(msg: &str) -> Error {
    Error::Internal(msg.to_string())
}

/// Return a `Vec` of secure random bytes of size `n`
pub fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    use ring::rand::SecureRandom;
    let mut buf = vec![0; n];
    let sysrand = ring::rand::SystemRandom::new();
    sysrand
        .fill(&mut buf)
        .map_err(|_| crypto_error("Error getting random bytes"))?;
    Ok(buf)
}

pub fn new_nonce() -> Result<Vec<u8>> {
    rand_bytes(12)
}

/// Return the SHA256 hash of `bytes`
pub fn hash(bytes: &[u8]) -> Vec<u8> {
    let alg = &ring::digest::SHA256;
    let digest = ring::digest::digest(alg, bytes);
    Vec::from(digest.as_ref())
}

/// Encrypt `bytes` with the given `nonce` and `pass`
///
/// `bytes` are encrypted using AES_256_GCM, `nonce` is expected to be
/// 12-bytes, and `pass` 32-bytes
pub fn encrypt(bytes: &[u8], nonce: &[u8], pass: &[u8]) -> Result<Vec<u8>> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| crypto_error("Encryption nonce not unique"))?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass)
        .map_err(|_| crypto_error("Error building sealing key"))?;
    let mut key = ring::aead::SealingKey::new(key, nonce);
    let mut in_out = bytes.to_vec();
    key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| crypto_error("Failed encrypting bytes"))?;
    Ok(in_out)
}

/// Decrypt `bytes` with the given `nonce` and `pass`
///
/// `bytes` are decrypted using AES_256_GCM, `nonce` is expected to be
/// 12-bytes, and `pass` 32-bytes
pub fn decrypt<'a>(bytes: &'a mut [u8], nonce: &[u8], pass: &[u8]) -> Result<&'a [u8]> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| crypto_error("Decryption nonce not unique"))?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass)
        .map_err(|_| crypto_error("Error build opening key"))?;
    let mut key = ring::aead::OpeningKey::new(key, nonce);
    let out_slice = key
        .open_in_place(ring::aead::Aad::empty(), bytes)
        .map_err(|_| crypto_error("Failed decrypting bytes"))?;
    Ok(out_slice)
}

/// Encrypt a token for storage, returning `<nonce>.<ciphertext>`
pub fn seal(plain: &str, key: &[u8]) -> Result<String> {
    let nonce = new_nonce()?;
    let b = encrypt(plain.as_bytes(), &nonce, key)?;
    Ok(format!("{}.{}", hex::encode(&nonce), hex::encode(&b)))
}

/// Reverse of `seal`
pub fn open(sealed: &str, key: &[u8]) -> Result<String> {
    let (nonce, value) = sealed
        .split_once('.')
        .ok_or_else(|| crypto_error("sealed value missing nonce separator"))?;
    let nonce = hex::decode(nonce).map_err(|_| crypto_error("nonce hex decode error"))?;
    let mut value = hex::decode(value).map_err(|_| crypto_error("value hex decode error"))?;
    let bytes = decrypt(value.as_mut_slice(), &nonce, key)?;
    String::from_utf8(bytes.to_owned()).map_err(|_| crypto_error("decrypted value is not utf8"))
}

const BCRYPT_COST: u32 = 10;

lazy_static::lazy_static! {
    // compared against when an email is unknown, so a miss costs
    // as much as a wrong password
    static ref DUMMY_HASH: Option<String> = bcrypt::hash("not-a-real-password", BCRYPT_COST).ok();
}

/// Hashes on the blocking pool, off the request executor.
pub async fn hash_password(password: String) -> Result<String> {
    async_std::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(|e| Error::Internal(format!("bcrypt hash: {}", e)))
}

/// Check `password` against `hash`. With no hash the check still runs
/// against a throwaway hash and always fails.
pub async fn verify_password(password: String, hash: Option<String>) -> Result<bool> {
    async_std::task::spawn_blocking(move || match hash {
        Some(hash) => bcrypt::verify(password, &hash)
            .map_err(|e| Error::Internal(format!("bcrypt verify: {}", e))),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                bcrypt::verify(password, dummy).ok();
            }
            Ok(false)
        }
    })
    .await
}
