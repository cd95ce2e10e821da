//! Ed25519 self-identities bound to a network location.
//!
//! A peer proves that it speaks for a location by signing the canonical
//! `my-location` envelope with a session key pair:
//! 1. Serialize `{type: "my-location", location}` canonically.
//! 2. Sign the bytes with Ed25519 (via `ed25519-dalek`).
//! 3. Present `{publicKey, location, locationSignature}` in `op:start-session`.
//!
//! The receiving side recomputes the envelope for the claimed location and
//! verifies the signature against the claimed public key.

use crate::error::{IdentityError, IdentityResult};
use crate::location::{Location, MyLocation};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Wire form of a public key:
/// `{type:"public-key", scheme:"ecc", curve:"Ed25519", flags:"eddsa", q}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub scheme: String,
    pub curve: String,
    pub flags: String,
    #[serde(with = "crate::serde_compat::hex_array")]
    pub q: [u8; 32],
}

impl PublicKeyDescriptor {
    pub fn ed25519(q: [u8; 32]) -> Self {
        Self {
            kind: "public-key".to_string(),
            scheme: "ecc".to_string(),
            curve: "Ed25519".to_string(),
            flags: "eddsa".to_string(),
            q,
        }
    }
}

/// Double SHA-256 of a public-key descriptor. Compared as unsigned bytes to
/// break crossed-hellos ties.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKeyId(pub [u8; 32]);

impl fmt::Debug for PublicKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyId({})", hex::encode(&self.0[..8]))
    }
}

/// A verified-shape Ed25519 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Parse the `q` bytes of a descriptor.
    pub fn from_bytes(q: &[u8; 32]) -> IdentityResult<Self> {
        let key = VerifyingKey::from_bytes(q)
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_descriptor(descriptor: &PublicKeyDescriptor) -> IdentityResult<Self> {
        if descriptor.curve != "Ed25519" {
            return Err(IdentityError::InvalidPublicKey(format!(
                "unsupported curve {}",
                descriptor.curve
            )));
        }
        Self::from_bytes(&descriptor.q)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    pub fn descriptor(&self) -> PublicKeyDescriptor {
        PublicKeyDescriptor::ed25519(self.to_bytes())
    }

    /// `sha256(sha256(canonical descriptor bytes))`.
    pub fn id(&self) -> PublicKeyId {
        // Serializing a fixed-shape struct of strings and hex cannot fail.
        let bytes = serde_json::to_vec(&self.descriptor()).unwrap_or_default();
        let once = Sha256::digest(&bytes);
        PublicKeyId(Sha256::digest(once).into())
    }

    pub fn verify(&self, message: &[u8], signature: &LocationSignature) -> IdentityResult<()> {
        // A reduced scalar is below 2^253.
        if signature.s[31] & 0xe0 != 0 {
            return Err(IdentityError::InvalidSignature(
                "s is not a reduced scalar".to_string(),
            ));
        }
        let signature = signature.to_signature();
        self.key
            .verify(message, &signature)
            .map_err(|_| IdentityError::LocationSignatureMismatch)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.to_bytes()[..8]))
    }
}

/// Ed25519 signature over a `my-location` envelope, split into `r` and `s`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSignature {
    #[serde(with = "crate::serde_compat::hex_array")]
    pub r: [u8; 32],
    #[serde(with = "crate::serde_compat::hex_array")]
    pub s: [u8; 32],
}

impl LocationSignature {
    fn from_signature(signature: &Signature) -> Self {
        Self {
            r: *signature.r_bytes(),
            s: *signature.s_bytes(),
        }
    }

    fn to_signature(&self) -> Signature {
        Signature::from_components(self.r, self.s)
    }
}

/// An Ed25519 signing key pair. Created fresh for every connection attempt.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey {
            key: signing_key.verifying_key(),
        };
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> LocationSignature {
        LocationSignature::from_signature(&self.signing_key.sign(message))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// The identity this side presents on one connection.
#[derive(Debug, Clone)]
pub struct SelfIdentity {
    pub key_pair: KeyPair,
    pub location: Location,
    pub location_signature: LocationSignature,
}

impl SelfIdentity {
    /// Generate an ephemeral key pair and sign `location` with it.
    pub fn generate(location: Location) -> IdentityResult<Self> {
        Self::with_key_pair(KeyPair::generate(), location)
    }

    pub fn with_key_pair(key_pair: KeyPair, location: Location) -> IdentityResult<Self> {
        let bytes = MyLocation::new(&location).to_bytes()?;
        let location_signature = key_pair.sign(&bytes);
        Ok(Self {
            key_pair,
            location,
            location_signature,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }
}

/// Check that `signature` is `public_key`'s signature over the canonical
/// envelope of `location`.
pub fn verify_location_signature(
    location: &Location,
    signature: &LocationSignature,
    public_key: &PublicKey,
) -> IdentityResult<()> {
    let bytes = MyLocation::new(location).to_bytes()?;
    public_key.verify(&bytes, signature)
}

/// Identifier of a session, identical on both sides.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 32]);

impl SessionId {
    /// `sha256(sha256("prot0" || lower id || higher id))`.
    pub fn from_key_ids(a: &PublicKeyId, b: &PublicKeyId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Sha256::new();
        hasher.update(b"prot0");
        hasher.update(low.0);
        hasher.update(high.0);
        let once = hasher.finalize();
        SessionId(Sha256::digest(once).into())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
