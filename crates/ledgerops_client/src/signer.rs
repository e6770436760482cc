//! Signing capability and the serialized session used by the client.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::types::Address;

const SECRET_KEY_LEN: usize = 32;

/// Session locks by signing identity. Entries are weak so identities that
/// are no longer in use do not pin their lock.
static SESSION_LOCKS: LazyLock<parking_lot::Mutex<HashMap<Address, Weak<Mutex<()>>>>> =
    LazyLock::new(Default::default);

/// The session lock shared by every [`SerializedSigner`] acting for `address`.
fn session_lock(address: &Address) -> Arc<Mutex<()>> {
    let mut locks = SESSION_LOCKS.lock();
    if let Some(lock) = locks.get(address).and_then(Weak::upgrade) {
        return lock;
    }
    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    locks.insert(address.clone(), Arc::downgrade(&lock));
    lock
}

/// Failures of a signing capability.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    #[error("Signing refused: {0}")]
    Refused(String),
}

/// Detached signature over an operation's canonical bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Delegated authority to sign on behalf of one identity. Implementations
/// never hand out key material.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address of the identity this signer acts for.
    fn public_key_hash(&self) -> Address;

    /// Sign `bytes`.
    async fn sign(&self, bytes: &[u8]) -> Result<Signature, SignerError>;
}

// ---------------------------------------------------------------------------
// InMemorySigner
// ---------------------------------------------------------------------------

/// Ed25519 signer holding its key in process memory.
pub struct InMemorySigner {
    key: SigningKey,
    address: Address,
}

impl InMemorySigner {
    /// Build from a hex-encoded 32-byte secret seed.
    pub fn from_secret_hex(secret_hex: &str, address: Address) -> Result<Self, SignerError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| SignerError::InvalidKey(format!("secret key is not hex: {e}")))?;
        let seed: [u8; SECRET_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            SignerError::InvalidKey(format!(
                "secret key must be {SECRET_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
            address,
        })
    }

    /// Fresh random key for the given address.
    pub fn generate(address: Address) -> Self {
        let seed = rand::random::<[u8; SECRET_KEY_LEN]>();
        Self {
            key: SigningKey::from_bytes(&seed),
            address,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl fmt::Debug for InMemorySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for InMemorySigner {
    fn public_key_hash(&self) -> Address {
        self.address.clone()
    }

    async fn sign(&self, bytes: &[u8]) -> Result<Signature, SignerError> {
        Ok(Signature(self.key.sign(bytes).to_bytes().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// SerializedSigner
// ---------------------------------------------------------------------------

/// A signer shared between clients, with one lock guarding the
/// read-counter / sign / broadcast sequence. The lock belongs to the
/// signing identity: every `SerializedSigner` for the same address shares
/// it, however it was constructed.
#[derive(Clone)]
pub struct SerializedSigner {
    signer: Arc<dyn Signer>,
    lock: Arc<Mutex<()>>,
}

impl SerializedSigner {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        let lock = session_lock(&signer.public_key_hash());
        Self { signer, lock }
    }

    pub fn address(&self) -> Address {
        self.signer.public_key_hash()
    }

    /// Enter the counter-critical section. Holding the returned session is
    /// the only way to sign.
    pub async fn session(&self) -> SigningSession<'_> {
        let guard = self.lock.lock().await;
        debug!(signer = %self.address(), "signing session opened");
        SigningSession {
            signer: self.signer.as_ref(),
            _guard: guard,
        }
    }
}

impl fmt::Debug for SerializedSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a shared signer; released on drop.
pub struct SigningSession<'a> {
    signer: &'a dyn Signer,
    _guard: MutexGuard<'a, ()>,
}

impl SigningSession<'_> {
    pub fn address(&self) -> Address {
        self.signer.public_key_hash()
    }

    pub async fn sign(&self, bytes: &[u8]) -> Result<Signature, SignerError> {
        self.signer.sign(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ALICE: &str = "tz1MnmtP4uAcgMpeZN6JtyziXeFqqwQG6yn6";
    const CAROL: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn alice() -> Address {
        Address::parse(ALICE).unwrap()
    }

    #[tokio::test]
    async fn in_memory_signer_produces_verifiable_signatures() {
        let signer = InMemorySigner::from_secret_hex(SEED, alice()).unwrap();
        let sig = signer.sign(b"operation bytes").await.unwrap();
        assert_eq!(sig.0.len(), 64);

        let signature = ed25519_dalek::Signature::from_slice(&sig.0).unwrap();
        assert!(
            signer
                .verifying_key()
                .verify(b"operation bytes", &signature)
                .is_ok()
        );
        assert_eq!(signer.public_key_hash(), alice());
    }

    #[test]
    fn from_secret_hex_rejects_bad_keys() {
        assert!(matches!(
            InMemorySigner::from_secret_hex("zz", alice()),
            Err(SignerError::InvalidKey(_))
        ));
        assert!(matches!(
            InMemorySigner::from_secret_hex("abcd", alice()),
            Err(SignerError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_hides_key_material() {
        let signer = InMemorySigner::from_secret_hex(SEED, alice()).unwrap();
        let printed = format!("{signer:?}");
        assert!(!printed.contains(SEED));
        assert!(printed.contains(ALICE));
    }

    struct SlowSigner {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl Signer for SlowSigner {
        fn public_key_hash(&self) -> Address {
            alice()
        }

        async fn sign(&self, _bytes: &[u8]) -> Result<Signature, SignerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Signature(vec![0; 64]))
        }
    }

    #[tokio::test]
    async fn sessions_serialize_concurrent_signing() {
        let inner = Arc::new(SlowSigner {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let shared = SerializedSigner::new(inner.clone());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let signer = shared.clone();
            handles.push(tokio::spawn(async move {
                let session = signer.session().await;
                session.sign(b"x").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(inner.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrappers_for_one_identity_share_the_session_lock() {
        let inner = Arc::new(SlowSigner {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let first = SerializedSigner::new(inner.clone());
        let second = SerializedSigner::new(inner.clone());
        assert!(Arc::ptr_eq(&first.lock, &second.lock));

        let sign = |signer: SerializedSigner| async move {
            let session = signer.session().await;
            session.sign(b"x").await.unwrap();
        };
        tokio::join!(sign(first), sign(second));
        assert_eq!(inner.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_identities_do_not_share_a_lock() {
        let alice = SerializedSigner::new(Arc::new(InMemorySigner::generate(alice())));
        let carol = SerializedSigner::new(Arc::new(InMemorySigner::generate(
            Address::parse(CAROL).unwrap(),
        )));
        assert!(!Arc::ptr_eq(&alice.lock, &carol.lock));
    }
}
