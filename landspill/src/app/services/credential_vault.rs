// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Passcode-protected persistence of a [`Credential`].
//!
//! The file is a single binary blob:
//!
//! ```text
//! magic "LSCRED" | version u8 | m_cost u32 | t_cost u32 | p_cost u32
//! | salt [16] | nonce [12] | key check [16] | AES-256-GCM ciphertext + tag
//! ```
//!
//! The key is derived from the passcode with Argon2id. The key check is a
//! truncated HMAC-SHA256 of a fixed label under the derived key, which lets a
//! wrong passcode be told apart from a damaged file. The whole header is bound
//! to the ciphertext as associated data.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes, invalid_argument, local_error};
use crate::app::types::Credential;

const MAGIC: &[u8; 6] = b"LSCRED";
const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_CHECK_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PARAMS_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + 1 + PARAMS_LEN + SALT_LEN + NONCE_LEN + KEY_CHECK_LEN;
const KEY_CHECK_LABEL: &[u8] = b"landspill/credential/key-check";
const MAX_MEMORY_KIB: u32 = 1 << 20;
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

type HmacSha256 = Hmac<Sha256>;

/// Argon2id cost parameters. They are stored in the file header so a blob
/// written with one setting can still be opened after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Costs a file may carry. Anything above these is refused before the
    /// key is derived.
    pub fn within_limits(&self) -> bool {
        (1..=MAX_MEMORY_KIB).contains(&self.memory_kib)
            && (1..=MAX_ITERATIONS).contains(&self.iterations)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
    }

    fn to_argon2(self) -> Result<Params, argon2::Error> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    kdf: KdfParams,
}

impl CredentialStore {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Encrypt `credential` under `passcode` and overwrite `path` with the blob.
    pub fn encrypt_and_write(
        &self,
        credential: &Credential,
        passcode: &str,
        path: &Path,
    ) -> AppResult<()> {
        let blob = self.encrypt(credential, passcode)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                local_error(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        fs::write(path, &blob)
            .map_err(|err| local_error(format!("failed to write {}: {err}", path.display())))?;
        restrict_permissions(path);
        tracing::info!(path = %path.display(), "encrypted credential written");
        Ok(())
    }

    pub fn read_and_decrypt(&self, path: &Path, passcode: &str) -> AppResult<Credential> {
        let blob = fs::read(path)
            .map_err(|err| local_error(format!("failed to read {}: {err}", path.display())))?;
        decrypt(&blob, passcode).map_err(|err| err.with_context(path.display().to_string()))
    }

    pub fn encrypt(&self, credential: &Credential, passcode: &str) -> AppResult<Vec<u8>> {
        credential.ensure_complete()?;
        if passcode.is_empty() {
            return Err(invalid_argument("passcode cannot be empty"));
        }

        if !self.kdf.within_limits() {
            return Err(invalid_argument(format!(
                "unsupported key derivation parameters: {:?}",
                self.kdf
            )));
        }

        let mut rng = rand::rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut salt);
        rng.fill(&mut nonce);

        let key = derive_key(passcode, &salt, self.kdf)
            .map_err(|err| invalid_argument(format!("invalid key derivation parameters: {err}")))?;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(FORMAT_VERSION);
        header.extend_from_slice(&self.kdf.memory_kib.to_le_bytes());
        header.extend_from_slice(&self.kdf.iterations.to_le_bytes());
        header.extend_from_slice(&self.kdf.parallelism.to_le_bytes());
        header.extend_from_slice(&salt);
        header.extend_from_slice(&nonce);
        header.extend_from_slice(&key_check(key.as_slice())?);

        let plaintext = Zeroizing::new(serde_json::to_vec(credential).map_err(|err| {
            AppError::with_message(
                AppErrorKind::Internal,
                codes::INTERNAL_ERROR,
                format!("failed to serialize credential: {err}"),
            )
        })?);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: &header,
                },
            )
            .map_err(|_| {
                AppError::with_message(
                    AppErrorKind::Internal,
                    codes::INTERNAL_ERROR,
                    "credential encryption failed",
                )
            })?;

        let mut blob = header;
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }
}

/// Decrypt a blob produced by [`CredentialStore::encrypt`].
///
/// Fails with `WRONG_PASSCODE` when the key check does not match and with
/// `CORRUPTED_CREDENTIAL` for anything structurally wrong or when the
/// authentication tag is rejected. No partial data is ever returned.
pub fn decrypt(blob: &[u8], passcode: &str) -> AppResult<Credential> {
    if blob.len() < HEADER_LEN + TAG_LEN {
        return Err(corrupted("credential file is truncated"));
    }
    let (header, ciphertext) = blob.split_at(HEADER_LEN);
    if &header[..MAGIC.len()] != MAGIC {
        return Err(corrupted("not a landspill credential file"));
    }
    let version = header[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(corrupted(format!(
            "unsupported credential file version {version}"
        )));
    }

    let mut offset = MAGIC.len() + 1;
    let mut next_u32 = || {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&header[offset..offset + 4]);
        offset += 4;
        u32::from_le_bytes(bytes)
    };
    let kdf = KdfParams {
        memory_kib: next_u32(),
        iterations: next_u32(),
        parallelism: next_u32(),
    };
    if !kdf.within_limits() {
        return Err(corrupted("unsupported key derivation parameters"));
    }
    let salt_start = MAGIC.len() + 1 + PARAMS_LEN;
    let salt = &header[salt_start..salt_start + SALT_LEN];
    let nonce_start = salt_start + SALT_LEN;
    let nonce = &header[nonce_start..nonce_start + NONCE_LEN];
    let check_start = nonce_start + NONCE_LEN;
    let stored_check = &header[check_start..check_start + KEY_CHECK_LEN];

    let key = derive_key(passcode, salt, kdf)
        .map_err(|err| corrupted(format!("invalid key derivation parameters: {err}")))?;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_slice())
        .map_err(|_| corrupted("invalid derived key length"))?;
    mac.update(KEY_CHECK_LABEL);
    if mac.verify_truncated_left(stored_check).is_err() {
        return Err(AppError::with_message(
            AppErrorKind::Authentication,
            codes::WRONG_PASSCODE,
            "wrong passcode",
        ));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| corrupted("credential file failed integrity check"))?,
    );
    serde_json::from_slice(plaintext.as_slice())
        .map_err(|_| corrupted("credential payload is not readable"))
}

/// Load the five-line plain-text credential file (batch name, batch key,
/// batch URL, storage name, storage key).
pub fn read_plain_file(path: &Path) -> AppResult<Credential> {
    let contents = Zeroizing::new(
        fs::read_to_string(path)
            .map_err(|err| local_error(format!("failed to read {}: {err}", path.display())))?,
    );
    let lines: Vec<&str> = contents.lines().map(str::trim).collect();
    if lines.len() < 5 {
        return Err(invalid_argument(format!(
            "credential file {} needs 5 lines, found {}",
            path.display(),
            lines.len()
        )));
    }
    let credential = Credential {
        batch_account_name: lines[0].to_string(),
        batch_account_key: lines[1].to_string(),
        batch_account_url: lines[2].to_string(),
        storage_account_name: lines[3].to_string(),
        storage_account_key: lines[4].to_string(),
    };
    credential.ensure_complete()?;
    Ok(credential)
}

fn derive_key(
    passcode: &str,
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, argon2::Error> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, kdf.to_argon2()?);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2.hash_password_into(passcode.as_bytes(), salt, key.as_mut_slice())?;
    Ok(key)
}

fn key_check(key: &[u8]) -> AppResult<[u8; KEY_CHECK_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| {
        AppError::with_message(
            AppErrorKind::Internal,
            codes::INTERNAL_ERROR,
            "invalid derived key length",
        )
    })?;
    mac.update(KEY_CHECK_LABEL);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; KEY_CHECK_LEN];
    out.copy_from_slice(&digest[..KEY_CHECK_LEN]);
    Ok(out)
}

fn corrupted(message: impl Into<String>) -> AppError {
    AppError::with_message(
        AppErrorKind::Authentication,
        codes::CORRUPTED_CREDENTIAL,
        message,
    )
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::debug!(path = %path.display(), "could not restrict permissions: {err}");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
