//! Typed message registry and tag-discriminated serialization.
//!
//! Messages are a tagged union over the object-safe [`Message`] trait. Each
//! variant registers with a [`RegistryBuilder`] and receives the next integer
//! tag, starting at 1 and assigned in registration order. Registration is
//! idempotent by variant identity. The builder freezes into an immutable
//! [`MessageRegistry`] shared by handle across all connections; the table
//! must be complete before the acceptor starts.
//!
//! Plaintext payload layout: a fixed-width `u32` little-endian tag followed
//! by the variant's `bincode` standard-configuration encoding. Unknown tags
//! deserialize to the [`UnknownMessage`] sentinel, which the builder
//! registers at initialization.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
};

use bincode::config;

use crate::error::RegistryError;

/// Width of the tag discriminator at the start of each plaintext payload.
pub const TAG_LEN: usize = 4;

/// Tag reserved for the [`UnknownMessage`] sentinel.
///
/// [`RegistryBuilder::new`] registers the sentinel first, so it always holds
/// the first assigned tag.
const SENTINEL_TAG: u32 = 1;

/// Object-safe base trait for wire messages.
///
/// Any `Debug + Send + Sync + 'static` type implements `Message` through the
/// blanket impl; variants additionally need `bincode::Encode` and
/// `bincode::Decode` to be registrable.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Upcast to [`Any`] for downcasting by consumers.
    fn as_any(&self) -> &dyn Any;

    /// Rust type name of the concrete variant, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T> Message for T
where
    T: Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any { self }

    fn type_name(&self) -> &'static str { type_name::<T>() }
}

impl dyn Message {
    /// Downcast a received message to a concrete variant.
    #[must_use]
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> { self.as_any().downcast_ref() }

    /// Whether the message is the given concrete variant.
    #[must_use]
    pub fn is<T: Message>(&self) -> bool { self.as_any().is::<T>() }
}

/// Sentinel carried for wire tags with no registered variant.
///
/// The raw body bytes are preserved for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownMessage {
    /// Tag observed on the wire.
    pub tag: u32,
    /// Undecoded body bytes following the tag.
    pub body: Vec<u8>,
}

type EncodeFn = fn(&dyn Message) -> Result<Vec<u8>, RegistryError>;
type DecodeFn = fn(&[u8]) -> Result<Box<dyn Message>, RegistryError>;

struct Entry {
    tag: u32,
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

fn encode_erased<T>(message: &dyn Message) -> Result<Vec<u8>, RegistryError>
where
    T: Message + bincode::Encode,
{
    let concrete = message
        .downcast_ref::<T>()
        .ok_or(RegistryError::UnregisteredMessage {
            type_name: type_name::<T>(),
        })?;
    Ok(bincode::encode_to_vec(concrete, config::standard())?)
}

fn decode_erased<T>(body: &[u8]) -> Result<Box<dyn Message>, RegistryError>
where
    T: Message + bincode::Decode<()>,
{
    let (message, _consumed) = bincode::decode_from_slice::<T, _>(body, config::standard())?;
    Ok(Box::new(message))
}

/// Builder assigning tags to message variants before the registry freezes.
///
/// # Examples
///
/// ```
/// use sealframe::registry::RegistryBuilder;
///
/// #[derive(Debug, bincode::Encode, bincode::Decode)]
/// struct Ping {
///     seq: u32,
/// }
///
/// let registry = RegistryBuilder::new().register::<Ping>().build();
/// assert_eq!(registry.tag_of::<Ping>(), Some(2)); // tag 1 is the sentinel
/// ```
pub struct RegistryBuilder {
    entries: Vec<Entry>,
    by_type: HashMap<TypeId, usize>,
    next_tag: u32,
}

impl RegistryBuilder {
    /// Create a builder with the [`UnknownMessage`] sentinel pre-registered.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self {
            entries: Vec::new(),
            by_type: HashMap::new(),
            next_tag: 0,
        };
        // The sentinel takes the first tag. Its body is carried verbatim in
        // both directions; `serialize` substitutes the sentinel's original
        // wire tag for the table slot.
        builder.insert::<UnknownMessage>(
            |message| {
                let unknown = message.downcast_ref::<UnknownMessage>().ok_or(
                    RegistryError::UnregisteredMessage {
                        type_name: type_name::<UnknownMessage>(),
                    },
                )?;
                Ok(unknown.body.clone())
            },
            |body| {
                // A peer sent the reserved sentinel tag itself; surface it
                // exactly as the unknown-tag path would.
                Ok(Box::new(UnknownMessage {
                    tag: SENTINEL_TAG,
                    body: body.to_vec(),
                }))
            },
        );
        builder
    }

    fn insert<T: Message>(&mut self, encode: EncodeFn, decode: DecodeFn) {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return;
        }
        self.next_tag += 1;
        self.by_type.insert(type_id, self.entries.len());
        self.entries.push(Entry {
            tag: self.next_tag,
            type_name: type_name::<T>(),
            encode,
            decode,
        });
    }

    /// Register a message variant, assigning it the next tag.
    ///
    /// Re-registering an already-present variant is a no-op.
    #[must_use]
    pub fn register<T>(mut self) -> Self
    where
        T: Message + bincode::Encode + bincode::Decode<()>,
    {
        self.insert::<T>(encode_erased::<T>, decode_erased::<T>);
        self
    }

    /// Freeze the table into an immutable registry.
    #[must_use]
    pub fn build(self) -> MessageRegistry {
        let by_tag = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.tag, index))
            .collect();
        MessageRegistry {
            entries: self.entries,
            by_type: self.by_type,
            by_tag,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self { Self::new() }
}

/// Immutable tag ↔ variant table shared across all connections.
pub struct MessageRegistry {
    entries: Vec<Entry>,
    by_type: HashMap<TypeId, usize>,
    by_tag: HashMap<u32, usize>,
}

impl MessageRegistry {
    /// Serialize a message into the tag-discriminated plaintext layout.
    ///
    /// An [`UnknownMessage`] is re-emitted under the tag it was received
    /// with, so forwarding a sentinel reproduces the original wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredMessage`] when the variant has no
    /// tag, or [`RegistryError::Encode`] when body encoding fails.
    pub fn serialize(&self, message: &dyn Message) -> Result<Vec<u8>, RegistryError> {
        let index = self.by_type.get(&message.as_any().type_id()).ok_or_else(|| {
            RegistryError::UnregisteredMessage {
                type_name: message.type_name(),
            }
        })?;
        let entry = &self.entries[*index];

        let body = (entry.encode)(message)?;
        let tag = message
            .downcast_ref::<UnknownMessage>()
            .map_or(entry.tag, |unknown| unknown.tag);
        let mut out = Vec::with_capacity(TAG_LEN + body.len());
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize a plaintext payload into a boxed message.
    ///
    /// Unknown tags yield an [`UnknownMessage`] carrying the tag and raw
    /// body.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TruncatedEnvelope`] when the payload cannot
    /// hold the tag, or [`RegistryError::Decode`] when body decoding fails
    /// for a registered variant.
    pub fn deserialize(&self, plaintext: &[u8]) -> Result<Box<dyn Message>, RegistryError> {
        if plaintext.len() < TAG_LEN {
            return Err(RegistryError::TruncatedEnvelope {
                len: plaintext.len(),
            });
        }
        let (tag_bytes, body) = plaintext.split_at(TAG_LEN);
        let tag = u32::from_le_bytes(tag_bytes.try_into().expect("tag slice is TAG_LEN bytes"));

        match self.by_tag.get(&tag) {
            Some(index) => (self.entries[*index].decode)(body),
            None => Ok(Box::new(UnknownMessage {
                tag,
                body: body.to_vec(),
            })),
        }
    }

    /// Wire tag assigned to a variant, if registered.
    #[must_use]
    pub fn tag_of<T: Message>(&self) -> Option<u32> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|index| self.entries[*index].tag)
    }

    /// Registered type name for a tag, if any.
    #[must_use]
    pub fn type_name_of(&self, tag: u32) -> Option<&'static str> {
        self.by_tag.get(&tag).map(|index| self.entries[*index].type_name)
    }

    /// Number of registered variants, sentinel included.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether only the sentinel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.len() <= 1 }
}
