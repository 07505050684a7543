//! Address-book name resolution
//!
//! A locally loaded name-to-address mapping is consulted before any
//! on-chain resolution. The book is loaded once at startup and immutable
//! for the process lifetime.

use crate::chain::ChainClient;
use crate::error::{ToolError, ToolResult};

use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// The underlying resolution capability the book falls back to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnsResolve: Send + Sync {
    async fn resolve_name(&self, name: &str) -> ToolResult<Address>;
}

#[async_trait]
impl EnsResolve for ChainClient {
    async fn resolve_name(&self, name: &str) -> ToolResult<Address> {
        self.resolve_ens(name).await
    }
}

/// Local name-to-address mapping.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<String, Address>,
}

impl AddressBook {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a book, treating a missing file as empty.
    pub fn load_if_present(path: &Path) -> ToolResult<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    /// Load a book from disk.
    ///
    /// Plain text files hold one `<name><whitespace><address>` entry per
    /// line with blank lines ignored; a `.json` file holds a single
    /// name-to-address object.
    pub fn load(path: &Path) -> ToolResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ToolError::Config(format!(
                "failed to read address book {}: {e}",
                path.display()
            ))
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&raw)
        } else {
            Self::from_text(&raw)
        }
    }

    fn from_text(raw: &str) -> ToolResult<Self> {
        let mut entries = HashMap::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (name, address) = match (parts.next(), parts.next()) {
                (Some(name), Some(address)) => (name, address),
                _ => {
                    return Err(ToolError::Config(format!(
                        "address book line {}: expected `<name> <address>`",
                        index + 1
                    )))
                }
            };
            let address: Address = address.parse().map_err(|_| {
                ToolError::Config(format!(
                    "address book line {}: invalid address {address:?}",
                    index + 1
                ))
            })?;
            entries.insert(name.to_string(), address);
        }
        Ok(Self { entries })
    }

    fn from_json(raw: &str) -> ToolResult<Self> {
        let mapping: HashMap<String, String> = serde_json::from_str(raw)
            .map_err(|e| ToolError::Config(format!("malformed address book: {e}")))?;

        let mut entries = HashMap::new();
        for (name, address) in mapping {
            let address: Address = address.parse().map_err(|_| {
                ToolError::Config(format!("invalid address {address:?} for {name:?}"))
            })?;
            entries.insert(name, address);
        }
        Ok(Self { entries })
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<Address> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name resolution with the address book in front of the underlying
/// resolver.
pub struct NameResolver {
    book: AddressBook,
    fallback: Arc<dyn EnsResolve>,
}

impl NameResolver {
    pub fn new(book: AddressBook, fallback: Arc<dyn EnsResolve>) -> Self {
        Self { book, fallback }
    }

    /// Resolve a name to an address.
    ///
    /// Literal hex addresses parse directly (a malformed `0x` string is an
    /// input error, not a resolution attempt); book entries win over the
    /// underlying resolver, whose result is otherwise returned unmodified.
    pub async fn resolve(&self, name: &str) -> ToolResult<Address> {
        if name.starts_with("0x") {
            return name
                .parse::<Address>()
                .map_err(|_| ToolError::InvalidAddress(name.to_string()));
        }
        if let Some(address) = self.book.get(name) {
            debug!("resolved {name:?} from address book");
            return Ok(address);
        }
        self.fallback.resolve_name(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn book(entries: &[(&str, Address)]) -> AddressBook {
        AddressBook {
            entries: entries
                .iter()
                .map(|(name, address)| (name.to_string(), *address))
                .collect(),
        }
    }

    #[tokio::test]
    async fn book_entry_wins_without_consulting_fallback() {
        let alice = Address::repeat_byte(0xaa);
        let mut fallback = MockEnsResolve::new();
        fallback.expect_resolve_name().never();

        let resolver = NameResolver::new(book(&[("alice", alice)]), Arc::new(fallback));
        assert_eq!(resolver.resolve("alice").await.unwrap(), alice);
    }

    #[tokio::test]
    async fn missing_entry_delegates_to_fallback() {
        let bob = Address::repeat_byte(0xbb);
        let mut fallback = MockEnsResolve::new();
        fallback
            .expect_resolve_name()
            .withf(|name| name == "bob")
            .times(1)
            .returning(move |_| Ok(bob));

        let resolver = NameResolver::new(book(&[]), Arc::new(fallback));
        assert_eq!(resolver.resolve("bob").await.unwrap(), bob);
    }

    #[tokio::test]
    async fn lookup_is_case_sensitive() {
        let alice = Address::repeat_byte(0xaa);
        let other = Address::repeat_byte(0xcc);
        let mut fallback = MockEnsResolve::new();
        fallback
            .expect_resolve_name()
            .times(1)
            .returning(move |_| Ok(other));

        let resolver = NameResolver::new(book(&[("alice", alice)]), Arc::new(fallback));
        assert_eq!(resolver.resolve("Alice").await.unwrap(), other);
    }

    #[tokio::test]
    async fn malformed_hex_address_is_an_input_error() {
        let mut fallback = MockEnsResolve::new();
        fallback.expect_resolve_name().never();

        let resolver = NameResolver::new(AddressBook::empty(), Arc::new(fallback));
        let err = resolver.resolve("0xnot-an-address").await.unwrap_err();
        assert!(err.is_input());
    }

    #[tokio::test]
    async fn literal_addresses_parse_directly() {
        let mut fallback = MockEnsResolve::new();
        fallback.expect_resolve_name().never();

        let resolver = NameResolver::new(AddressBook::empty(), Arc::new(fallback));
        let resolved = resolver
            .resolve("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
            .await
            .unwrap();
        assert_eq!(resolved, Address::repeat_byte(0xaa));
    }

    #[test]
    fn loads_text_format_with_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "alice 0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\n\
             bob   0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
        )
        .unwrap();

        let book = AddressBook::load(file.path()).unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book.get("alice"), Some(Address::repeat_byte(0xaa)));
        assert_eq!(book.get("bob"), Some(Address::repeat_byte(0xbb)));
        assert_eq!(book.get("carol"), None);
    }

    #[test]
    fn loads_json_format() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"{{"alice": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}}"#
        )
        .unwrap();

        let book = AddressBook::load(file.path()).unwrap();
        assert_eq!(book.get("alice"), Some(Address::repeat_byte(0xaa)));
    }

    #[test]
    fn rejects_malformed_text_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice").unwrap();
        assert!(AddressBook::load(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice not-an-address").unwrap();
        assert!(AddressBook::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let book = AddressBook::load_if_present(Path::new("no-such-addresses.txt")).unwrap();
        assert!(book.is_empty());
    }
}
