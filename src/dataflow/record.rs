//! The unit of data flowing through a [`DataChannel`](crate::communication::channel::DataChannel).
//!
//! [`Record`] is opaque to the framework by design: the
//! compiler, the channels, and the partitioners never know the concrete
//! payload type, only that it can be downcast by the worker that owns the
//! operator expecting it. This mirrors how erdos's
//! `StreamManager`/`StreamEndpoints` pair stores `Arc<dyn Any>` trait objects
//! and downcasts them back to a concrete `Message<D>` at the point of use.
use std::{
    any::Any,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// The bound every payload and key type flowing through the dataflow must
/// satisfy: it must be shareable across worker tasks, debug-printable for
/// logging and panic messages, and hashable so that `Shuffle`/`ShuffleByKey`
/// can compute a stable routing hash.
pub trait Data: Any + Send + Sync + fmt::Debug + Hash + 'static {}
impl<T: Any + Send + Sync + fmt::Debug + Hash + 'static> Data for T {}

/// A 64-bit FNV-1a hasher.
///
/// `Shuffle`/`ShuffleByKey` routing needs a hash that stays stable across
/// runs. Rust's default `SipHash` is reseeded per process, which rules it
/// out, so this crate carries its own tiny, dependency-free FNV-1a
/// implementation rather than reaching for a single-purpose hashing crate.
pub struct Fnv1aHasher(u64);

impl Default for Fnv1aHasher {
    fn default() -> Self {
        // FNV offset basis for 64-bit hashes.
        Fnv1aHasher(0xcbf29ce484222325)
    }
}

impl Hasher for Fnv1aHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        const FNV_PRIME: u64 = 0x100000001b3;
        for byte in bytes {
            self.0 ^= *byte as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Hashes any `Hash` value with the crate-wide stable [`Fnv1aHasher`].
pub fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = Fnv1aHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

struct KeyMeta {
    hash: u64,
    value: Arc<dyn Any + Send + Sync>,
    debug: String,
}

/// A record carrying a type-erased payload, plus an optional key attached by
/// `key_by`. Records are cheap to clone: the payload is held behind an `Arc`.
#[derive(Clone)]
pub struct Record {
    payload: Arc<dyn Any + Send + Sync>,
    payload_hash: u64,
    payload_debug: String,
    key: Option<Arc<KeyMeta>>,
}

impl Record {
    /// Wraps a plain (non-keyed) payload.
    pub fn new<T: Data>(value: T) -> Self {
        let payload_hash = stable_hash(&value);
        let payload_debug = format!("{:?}", value);
        Record {
            payload: Arc::new(value),
            payload_hash,
            payload_debug,
            key: None,
        }
    }

    /// Wraps a payload together with a key, as produced by `key_by`. The key
    /// is hashed eagerly so that `ShuffleByKey` never needs to know the
    /// concrete key type.
    pub fn keyed<K: Data, V: Data>(key: K, value: V) -> Self {
        let key_hash = stable_hash(&key);
        let key_debug = format!("{:?}", key);
        let payload_hash = stable_hash(&value);
        let payload_debug = format!("{:?}", value);
        Record {
            payload: Arc::new(value),
            payload_hash,
            payload_debug,
            key: Some(Arc::new(KeyMeta {
                hash: key_hash,
                value: Arc::new(key),
                debug: key_debug,
            })),
        }
    }

    /// Returns `true` if this record carries a key (i.e. is a KeyedRecord).
    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    /// The stable hash of the key, if this is a KeyedRecord.
    pub fn key_hash(&self) -> Option<u64> {
        self.key.as_ref().map(|k| k.hash)
    }

    /// The stable hash of the payload (used by the plain `Shuffle` strategy).
    pub fn payload_hash(&self) -> u64 {
        self.payload_hash
    }

    /// Attempts to downcast the payload to a concrete type.
    pub fn downcast_ref<T: Data>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Attempts to downcast the key to a concrete type.
    pub fn key_downcast_ref<K: Data>(&self) -> Option<&K> {
        self.key.as_ref()?.value.downcast_ref::<K>()
    }

    /// Carries `self`'s key metadata over onto `new_value`'s payload,
    /// without either side needing to know the other's concrete key type.
    /// Used by `Reduce`/`Sum` to keep a fold's accumulator attributed to
    /// the key that produced it.
    pub fn rekeyed_like(&self, new_value: Record) -> Record {
        Record {
            payload: new_value.payload,
            payload_hash: new_value.payload_hash,
            payload_debug: new_value.payload_debug,
            key: self.key.clone(),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "KeyedRecord{{ key: {}, value: {} }}", key.debug, self.payload_debug),
            None => write!(f, "Record{{ {} }}", self.payload_debug),
        }
    }
}

/// Convenience payload type returned by `key_by`: bundles the projected key
/// with the original value so that `reduce`/`sum` closures can see both.
#[derive(Clone, Debug, Hash)]
pub struct Keyed<K, V> {
    pub key: K,
    pub value: V,
}
