use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::access::{AccessResolver, Actor};
use crate::config::AccessPolicy;
use crate::error::{Error, Result};
use crate::notify::{Event, Notifier, ProjectRef, deliver};
use crate::store::Store;
use crate::types::{AccessLevel, DeployKey, Project};

/// A single OpenSSH public key line, decoded far enough to fingerprint it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub key_type: String,
    /// The base64 key body, as written in the line.
    pub body: String,
    pub comment: Option<String>,
    pub bits: u32,
    /// `SHA256:` followed by the unpadded base64 digest of the key blob.
    pub fingerprint: String,
}

impl PublicKey {
    /// Parses `<type> <base64> [comment]`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let mut parts = line.splitn(3, char::is_whitespace);
        let (Some(key_type), Some(body)) = (parts.next(), parts.next()) else {
            return Err(Error::InvalidSshKey(
                "expected `<type> <base64> [comment]`".to_string(),
            ));
        };
        let comment = parts
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let blob = STANDARD
            .decode(body)
            .map_err(|e| Error::InvalidSshKey(format!("key body is not base64: {e}")))?;
        let mut reader = blob.as_slice();
        let embedded = read_string(&mut reader)
            .ok_or_else(|| Error::InvalidSshKey("truncated key blob".to_string()))?;
        if embedded != key_type.as_bytes() {
            return Err(Error::InvalidSshKey(format!(
                "key type {key_type} does not match the key blob"
            )));
        }
        let bits = key_bits(key_type, reader)?;

        Ok(Self {
            key_type: key_type.to_string(),
            body: body.to_string(),
            comment,
            bits,
            fingerprint: format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&blob))),
        })
    }

    /// The key as `ssh-keygen -l` prints it.
    pub fn short_key(&self) -> String {
        format!(
            "{} {} {} ({})",
            self.bits,
            self.fingerprint,
            self.comment.as_deref().unwrap_or("no comment"),
            type_label(&self.key_type)
        )
    }

    /// The part used to find a key regardless of its comment.
    pub fn search_key(&self) -> &str {
        &self.body
    }
}

/// Reads one length-prefixed SSH wire string.
fn read_string<'b>(buf: &mut &'b [u8]) -> Option<&'b [u8]> {
    let (len, rest) = buf.split_first_chunk::<4>()?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    *buf = rest;
    Some(value)
}

/// Bit length of a big-endian unsigned integer, leading zero bytes ignored.
fn mpint_bits(value: &[u8]) -> u32 {
    let trimmed: &[u8] = match value.iter().position(|b| *b != 0) {
        Some(first) => &value[first..],
        None => return 0,
    };
    (trimmed.len() as u32 - 1) * 8 + (8 - trimmed[0].leading_zeros())
}

fn key_bits(key_type: &str, mut rest: &[u8]) -> Result<u32> {
    let truncated = || Error::InvalidSshKey(format!("truncated {key_type} key"));
    match key_type {
        "ssh-rsa" => {
            let _exponent = read_string(&mut rest).ok_or_else(truncated)?;
            let modulus = read_string(&mut rest).ok_or_else(truncated)?;
            Ok(mpint_bits(modulus))
        }
        "ssh-dss" => {
            let p = read_string(&mut rest).ok_or_else(truncated)?;
            Ok(mpint_bits(p))
        }
        "ssh-ed25519" | "sk-ssh-ed25519@openssh.com" => Ok(256),
        "ecdsa-sha2-nistp256" | "sk-ecdsa-sha2-nistp256@openssh.com" => Ok(256),
        "ecdsa-sha2-nistp384" => Ok(384),
        "ecdsa-sha2-nistp521" => Ok(521),
        other => Err(Error::InvalidSshKey(format!("unsupported key type {other}"))),
    }
}

fn type_label(key_type: &str) -> &'static str {
    match key_type {
        "ssh-rsa" => "RSA",
        "ssh-dss" => "DSA",
        "ssh-ed25519" => "ED25519",
        "sk-ssh-ed25519@openssh.com" => "ED25519-SK",
        "sk-ecdsa-sha2-nistp256@openssh.com" => "ECDSA-SK",
        _ => "ECDSA",
    }
}

/// Per-project SSH deploy keys. Adding or removing one requires admin
/// access on the project.
pub struct DeployKeys<'a> {
    store: &'a dyn Store,
    policy: &'a AccessPolicy,
    notifier: &'a dyn Notifier,
}

impl<'a> DeployKeys<'a> {
    pub fn new(store: &'a dyn Store, policy: &'a AccessPolicy, notifier: &'a dyn Notifier) -> Self {
        Self {
            store,
            policy,
            notifier,
        }
    }

    pub fn add_deploy_key(
        &self,
        project: &Project,
        public_key: &str,
        pushaccess: bool,
        actor: &Actor,
    ) -> Result<DeployKey> {
        AccessResolver::new(self.store, self.policy).require(actor, project, AccessLevel::Admin)?;
        let parsed = PublicKey::parse(public_key)?;

        let key = DeployKey {
            id: 0,
            project_id: project.id,
            pushaccess,
            public_ssh_key: public_key.trim().to_string(),
            ssh_short_key: parsed.short_key(),
            ssh_search_key: parsed.search_key().to_string(),
            creator_user_id: actor.id(),
            date_created: Utc::now(),
        };
        let key = self.store.create_deploy_key(&key).map_err(|e| {
            if e.is_unique_violation() {
                Error::Conflict("Deploy key already exists in this project".to_string())
            } else {
                e
            }
        })?;
        info!(project = %project.fullname(), key = %key.ssh_short_key, pushaccess, "Added deploy key");

        deliver(
            self.notifier,
            Event::DeployKeyAdded {
                project: ProjectRef::from(project),
                ssh_short_key: key.ssh_short_key.clone(),
                agent: actor.username().to_string(),
            },
        );
        Ok(key)
    }

    pub fn list_deploy_keys(&self, project: &Project) -> Result<Vec<DeployKey>> {
        self.store.list_deploy_keys(project.id)
    }

    /// Every deploy key, across projects, carrying the same key material as
    /// `public_key`.
    pub fn find_deploy_keys(&self, public_key: &str) -> Result<Vec<DeployKey>> {
        let parsed = PublicKey::parse(public_key)?;
        self.store.find_deploy_keys(parsed.search_key())
    }

    pub fn remove_deploy_key(&self, project: &Project, key_id: i64, actor: &Actor) -> Result<()> {
        AccessResolver::new(self.store, self.policy).require(actor, project, AccessLevel::Admin)?;
        let key = self
            .store
            .list_deploy_keys(project.id)?
            .into_iter()
            .find(|k| k.id == key_id)
            .ok_or_else(|| {
                Error::NotFound(format!("deploy key {key_id} on {}", project.fullname()))
            })?;

        self.store.delete_deploy_key(key.id)?;
        info!(project = %project.fullname(), key = %key.ssh_short_key, "Removed deploy key");
        deliver(
            self.notifier,
            Event::DeployKeyRemoved {
                project: ProjectRef::from(project),
                ssh_short_key: key.ssh_short_key,
                agent: actor.username().to_string(),
            },
        );
        Ok(())
    }
}
