//! Explicit key to factory registries.
//!
//! Descriptors and parsers are offered to the host through registries that are
//! filled by plain `register` calls. Nothing registers itself.

use std::fmt;

use crate::descriptor::BufferDescriptor;
use crate::parser::Parser;

/// Builds a fresh value for a registry entry.
pub type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Ordered map from key to factory. Insertion order is preserved.
pub struct Registry<T> {
    entries: Vec<(String, Factory<T>)>,
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("keys", &self.keys().collect::<Vec<_>>()).finish()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds a factory under `key`. Returns `false` if the key is taken.
    pub fn register(&mut self, key: impl Into<String>, factory: impl Fn() -> T + Send + Sync + 'static) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.entries.push((key, Box::new(factory)));
        true
    }

    /// Removes `key`. Returns `false` if it was not registered.
    pub fn unregister(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    /// Builds the value registered under `key`.
    #[must_use]
    pub fn create(&self, key: &str) -> Option<T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, factory)| factory())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Registered keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Registry<BufferDescriptor> {
    /// The well-known buffers.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("packetbuf_aligned", BufferDescriptor::packetbuf);
        registry.register("packetbufptr", BufferDescriptor::packetbuf_pointer);
        registry.register("node_id", BufferDescriptor::node_id);
        registry.register("buframmem", BufferDescriptor::queuebuf0);
        registry
    }
}

impl Registry<Parser> {
    /// Every parser, keyed by [`Parser::key`].
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Parser::ByteArray.key(), || Parser::ByteArray);
        registry.register(Parser::IntegerArray.key(), || Parser::IntegerArray);
        registry.register(Parser::TerminatedString.key(), || Parser::TerminatedString);
        registry.register(Parser::PrintableCharacters.key(), || Parser::PrintableCharacters);
        registry.register(Parser::Ipv6Address.key(), || Parser::Ipv6Address);
        registry.register(Parser::Height4Bits.key(), || Parser::Height4Bits);
        registry.register(Parser::Grayscale.key(), || Parser::Grayscale);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut registry: Registry<u32> = Registry::new();
        assert!(registry.register("a", || 1));
        assert!(!registry.register("a", || 2));
        assert_eq!(registry.create("a"), Some(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_entry() {
        let mut registry: Registry<u32> = Registry::new();
        registry.register("a", || 1);
        registry.register("b", || 2);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.create("a"), None);
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn builtin_descriptors() {
        let registry = Registry::<BufferDescriptor>::builtin();
        assert_eq!(
            registry.keys().collect::<Vec<_>>(),
            vec!["packetbuf_aligned", "packetbufptr", "node_id", "buframmem"]
        );
        let pointer = registry.create("packetbufptr").unwrap();
        assert!(pointer.is_pointer());
        assert_eq!(pointer.symbol(), "packetbufptr");
        for key in ["packetbuf_aligned", "packetbufptr", "node_id", "buframmem"] {
            assert!(registry.create(key).unwrap().validate().is_ok());
        }
    }

    #[test]
    fn builtin_parsers_cover_all() {
        let registry = Registry::<Parser>::builtin();
        assert_eq!(registry.len(), Parser::ALL.len());
        for parser in Parser::ALL {
            assert_eq!(registry.create(parser.key()), Some(parser));
        }
    }
}
