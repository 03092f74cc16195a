//! Signed object blobs for the dissemination overlay
//!
//! The overlay is an optional accelerator: a worker may receive an object's
//! committed copy from a peer instead of its store. Such a blob is only
//! trusted after its ed25519 signature checks out against the owning
//! store's public key.
//!
//! ## Blob format
//!
//! The signed message is the MessagePack encoding of the
//! [`VersionedObject`], so the signature covers identity, version and
//! payload together.

use crate::error::{TesseraError, TesseraResult};
use crate::types::{Oid, StoreId, VersionedObject};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// A store-signed, serialized object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedGlob {
    /// Object the blob claims to carry
    pub oid: Oid,
    /// Version the blob claims to carry; checked by [`Self::open`]
    pub version: u64,
    /// MessagePack-encoded [`VersionedObject`]
    pub blob: Vec<u8>,
    /// ed25519 signature over `blob`
    pub signature: Vec<u8>,
}

impl SignedGlob {
    /// Encode and sign an object with the store's key
    pub fn seal(object: &VersionedObject, key: &SigningKey) -> TesseraResult<Self> {
        let blob = rmp_serde::to_vec(object)?;
        let signature = key.sign(&blob);
        Ok(Self {
            oid: object.oid.clone(),
            version: object.version,
            blob,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Verify against the store's public key and decode
    ///
    /// # Errors
    ///
    /// `SignatureInvalid` if the key or signature is malformed or does not
    /// match, `Corruption` if the verified blob does not decode to the
    /// object and version it claims to be.
    pub fn open(&self, public_key: &[u8; 32]) -> TesseraResult<VersionedObject> {
        let invalid = || TesseraError::SignatureInvalid {
            oid: self.oid.clone(),
        };
        let key = VerifyingKey::from_bytes(public_key).map_err(|_| invalid())?;
        let signature = Signature::from_slice(&self.signature).map_err(|_| invalid())?;
        key.verify(&self.blob, &signature).map_err(|_| invalid())?;

        let object: VersionedObject = rmp_serde::from_slice(&self.blob)
            .map_err(|e| TesseraError::corruption(self.oid.to_string(), e.to_string()))?;
        if object.oid != self.oid {
            return Err(TesseraError::corruption(
                self.oid.to_string(),
                format!("blob carries {}", object.oid),
            ));
        }
        if object.version != self.version {
            return Err(TesseraError::corruption(
                self.oid.to_string(),
                format!("blob carries version {}, labelled {}", object.version, self.version),
            ));
        }
        Ok(object)
    }
}

/// Source of overlay-delivered objects
pub trait GlobSource: Send + Sync {
    /// Fetch a signed blob, `None` if the overlay does not have it
    fn fetch_glob(&self, store: &StoreId, onum: u64) -> Option<SignedGlob>;
}
