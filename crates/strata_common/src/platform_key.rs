//! Platform fingerprint key for validating serialized cache contents.

use sha1::{Digest, Sha1};

/// Length in bytes of the platform-keyed digest written into blob headers.
pub const PLATFORM_DIGEST_LEN: usize = 20;

/// A device/driver/compiler fingerprint that salts and validates cache blobs.
///
/// The key wraps a SHA-1 context pre-seeded with the vendor id, device id,
/// pipeline-cache UUID and any extra fingerprint bytes the driver supplies
/// (driver build id, compiler version, and so on). A blob digest produced
/// under one key fails validation under any other key, so caches built on a
/// different device or driver version are rejected wholesale.
#[derive(Clone)]
pub struct PlatformKey {
    vendor_id: u32,
    device_id: u32,
    uuid: [u8; 16],
    /// SHA-1 context seeded with the full fingerprint. Digests are computed
    /// by cloning this context and feeding the payload, so the seed is
    /// hashed exactly once per key.
    context: Sha1,
    key64: u64,
}

impl PlatformKey {
    /// Creates a platform key from device identity and fingerprint bytes.
    pub fn new(vendor_id: u32, device_id: u32, uuid: [u8; 16], fingerprint: &[u8]) -> Self {
        let mut context = Sha1::new();
        context.update(vendor_id.to_le_bytes());
        context.update(device_id.to_le_bytes());
        context.update(uuid);
        context.update(fingerprint);

        let seed_digest: [u8; PLATFORM_DIGEST_LEN] = context.clone().finalize().into();
        let key64 = u64::from_le_bytes(seed_digest[..8].try_into().expect("8-byte prefix"));

        Self {
            vendor_id,
            device_id,
            uuid,
            context,
            key64,
        }
    }

    /// The PCI vendor id this key was built for.
    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    /// The PCI device id this key was built for.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// The pipeline-cache UUID this key was built for.
    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }

    /// Computes the keyed 20-byte digest over `data`.
    ///
    /// The digest covers only the caller-supplied bytes; the key material is
    /// already folded into the seeded context.
    pub fn digest(&self, data: &[u8]) -> [u8; PLATFORM_DIGEST_LEN] {
        let mut context = self.context.clone();
        context.update(data);
        context.finalize().into()
    }

    /// A compact 64-bit fingerprint of the key.
    ///
    /// Used to bind archive files to a platform and to derive default cache
    /// file names. Not a substitute for [`PlatformKey::digest`] validation.
    pub fn key64(&self) -> u64 {
        self.key64
    }
}

impl std::fmt::Debug for PlatformKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformKey")
            .field("vendor_id", &self.vendor_id)
            .field("device_id", &self.device_id)
            .field("key64", &format_args!("{:016x}", self.key64))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fingerprint: &[u8]) -> PlatformKey {
        PlatformKey::new(0x1002, 0x73bf, [7u8; 16], fingerprint)
    }

    #[test]
    fn digest_is_deterministic() {
        let k = key(b"driver 1.0");
        assert_eq!(k.digest(b"payload"), k.digest(b"payload"));
    }

    #[test]
    fn digest_depends_on_payload() {
        let k = key(b"driver 1.0");
        assert_ne!(k.digest(b"payload a"), k.digest(b"payload b"));
    }

    #[test]
    fn digest_depends_on_fingerprint() {
        let k1 = key(b"driver 1.0");
        let k2 = key(b"driver 2.0");
        assert_ne!(k1.digest(b"payload"), k2.digest(b"payload"));
    }

    #[test]
    fn digest_depends_on_device() {
        let k1 = PlatformKey::new(0x1002, 0x73bf, [7u8; 16], b"fp");
        let k2 = PlatformKey::new(0x1002, 0x73df, [7u8; 16], b"fp");
        assert_ne!(k1.digest(b"payload"), k2.digest(b"payload"));
    }

    #[test]
    fn key64_stable_and_key_dependent() {
        let k1 = key(b"driver 1.0");
        let k2 = key(b"driver 1.0");
        let k3 = key(b"driver 2.0");
        assert_eq!(k1.key64(), k2.key64());
        assert_ne!(k1.key64(), k3.key64());
    }

    #[test]
    fn empty_fingerprint_is_valid() {
        let k = key(b"");
        assert_eq!(k.digest(b"x").len(), PLATFORM_DIGEST_LEN);
    }
}
