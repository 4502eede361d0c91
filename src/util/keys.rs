use crate::error::{Error, Result};
use curve25519_dalek::{
    constants, edwards::EdwardsPoint, montgomery::MontgomeryPoint, scalar::Scalar,
};
use sha2::{Digest, Sha512};

/// Key type byte prefixed to serialized Curve25519 public keys.
const DJB_TYPE: u8 = 0x05;

/// Elliptic curve key pair for X25519
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyPair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut private_key = [0u8; 32];
        rng.fill_bytes(&mut private_key);
        Self::from_clamped(private_key)
    }

    /// Create from private key bytes
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Crypto("Private key must be 32 bytes".to_string()));
        }

        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(bytes);
        Ok(Self::from_clamped(private_key))
    }

    fn from_clamped(mut private_key: [u8; 32]) -> Self {
        // Clamp the private key for X25519
        private_key[0] &= 248;
        private_key[31] &= 127;
        private_key[31] |= 64;

        // Derive public key using curve25519-dalek
        let scalar = Scalar::from_bytes_mod_order(private_key);
        let public_key = (&scalar * &constants::X25519_BASEPOINT).to_bytes();

        Self {
            private_key,
            public_key,
        }
    }

    /// Perform ECDH using curve25519-dalek
    pub fn ecdh(&self, other_public: &[u8; 32]) -> [u8; 32] {
        let our_scalar = Scalar::from_bytes_mod_order(self.private_key);
        let shared_point = &our_scalar * &MontgomeryPoint(*other_public);
        shared_point.to_bytes()
    }

    /// Sign a message with this key using XEd25519.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        sign(&self.private_key, message)
    }
}

/// One-time pre-key record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
}

impl PreKey {
    pub fn generate(key_id: u32) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            key_id,
        }
    }
}

/// Pre-key whose public half is signed by the device identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
    pub signature: [u8; 64],
}

impl SignedPreKey {
    /// Generate a fresh key pair and sign its type-prefixed public key
    /// with the given identity key.
    pub fn generate(identity_key: &KeyPair, key_id: u32) -> Self {
        let key_pair = KeyPair::generate();
        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&key_pair.public_key);
        let signature = identity_key.sign(&message);
        Self {
            key_pair,
            key_id,
            signature,
        }
    }
}

/// XEd25519 signature with a Curve25519 private key (Signal's signing
/// scheme for Montgomery-form keys). The sign bit of the derived
/// Edwards public key is carried in the top bit of the last signature
/// byte.
pub fn sign(private_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
    use rand::RngCore;
    let mut z = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut z);
    sign_with_nonce(private_key, message, &z)
}

fn sign_with_nonce(private_key: &[u8; 32], message: &[u8], z: &[u8; 64]) -> [u8; 64] {
    let k = Scalar::from_bytes_mod_order(*private_key);
    let ed_public = EdwardsPoint::mul_base(&k).compress();
    let mut a_bytes = ed_public.to_bytes();
    let sign_bit = a_bytes[31] >> 7;
    a_bytes[31] &= 0x7F;
    let a = if sign_bit == 1 { -k } else { k };

    // r = SHA-512(0xFE || 0xFF*31 || a || M || Z) mod L
    let mut hasher = Sha512::new();
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFE;
    hasher.update(prefix);
    hasher.update(a.as_bytes());
    hasher.update(message);
    hasher.update(z);
    let r = Scalar::from_bytes_mod_order_wide(&hasher.finalize().into());
    let big_r = EdwardsPoint::mul_base(&r).compress();

    // h = SHA-512(R || A || M) mod L
    let mut hasher = Sha512::new();
    hasher.update(big_r.as_bytes());
    hasher.update(a_bytes);
    hasher.update(message);
    let h = Scalar::from_bytes_mod_order_wide(&hasher.finalize().into());

    let s = r + h * a;
    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(big_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    signature[63] |= sign_bit << 7;
    signature
}

/// Verify an XEd25519 signature against a Curve25519 public key.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let sign_bit = (signature[63] & 0x80) >> 7;
    let ed_public = match MontgomeryPoint(*public_key).to_edwards(sign_bit) {
        Some(point) => point,
        None => return false,
    };
    let a_bytes = ed_public.compress().to_bytes();

    let mut r_bytes = [0u8; 32];
    r_bytes.copy_from_slice(&signature[..32]);
    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&signature[32..]);
    s_bytes[31] &= 0x7F;
    let s = match Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) {
        Some(s) => s,
        None => return false,
    };

    let mut hasher = Sha512::new();
    hasher.update(r_bytes);
    hasher.update(a_bytes);
    hasher.update(message);
    let h = Scalar::from_bytes_mod_order_wide(&hasher.finalize().into());

    // R' = sB - hA must match the signature's R
    let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-h, &ed_public, &s);
    r_check.compress().to_bytes() == r_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let pair = KeyPair::generate();
        assert_ne!(pair.public_key, [0u8; 32]);

        // Clamping makes derivation deterministic from the private half
        let rebuilt = KeyPair::from_private_bytes(&pair.private_key).unwrap();
        assert_eq!(rebuilt.public_key, pair.public_key);
    }

    #[test]
    fn test_ecdh_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        assert_eq!(alice.ecdh(&bob.public_key), bob.ecdh(&alice.public_key));
    }

    #[test]
    fn test_sign_verify() {
        let pair = KeyPair::generate();
        let message = b"test message";
        let signature = pair.sign(message);

        assert!(verify(&pair.public_key, message, &signature));
        assert!(!verify(&pair.public_key, b"other message", &signature));

        let other = KeyPair::generate();
        assert!(!verify(&other.public_key, message, &signature));
    }

    #[test]
    fn test_signed_prekey() {
        let identity = KeyPair::generate();
        let signed = SignedPreKey::generate(&identity, 1);
        assert_eq!(signed.key_id, 1);

        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&signed.key_pair.public_key);
        assert!(verify(&identity.public_key, &message, &signed.signature));
    }
}
