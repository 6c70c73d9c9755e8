//! Service tokens
//!
//! A [`Token<T>`] names a service contract whose value has type `T`. Identity
//! is assigned once at construction: two tokens created with the same name are
//! still different keys, and clones of one token compare equal.
//!
//! ```rust
//! use lab_core::token::Token;
//!
//! struct KernelManager;
//!
//! let a: Token<KernelManager> = Token::new("kernels:manager");
//! let b: Token<KernelManager> = Token::new("kernels:manager");
//! assert_ne!(a.id(), b.id());
//! assert_eq!(a.id(), a.clone().id());
//! ```

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a token, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Diagnostic data carried by a token. Never part of identity.
#[derive(Debug)]
pub struct TokenInfo {
    id: TokenId,
    name: String,
    description: Option<String>,
    type_id: TypeId,
    type_name: &'static str,
}

/// Typed key for a service contract
pub struct Token<T> {
    info: Arc<TokenInfo>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Token<T> {
    /// Create a fresh token
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Create a fresh token with a description
    pub fn with_description(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::build(name.into(), Some(description.into()))
    }

    fn build(name: String, description: Option<String>) -> Self {
        let id = TokenId(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            info: Arc::new(TokenInfo {
                id,
                name,
                description,
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
            }),
            _marker: PhantomData,
        }
    }
}

impl<T> Token<T> {
    pub fn id(&self) -> TokenId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    /// Type-erased view of this token
    pub fn erase(&self) -> AnyToken {
        AnyToken {
            info: Arc::clone(&self.info),
        }
    }
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            info: Arc::clone(&self.info),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl<T> Eq for Token<T> {}

impl<T> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("type", &self.info.type_name)
            .finish()
    }
}

/// Token with its service type erased, used in descriptors and indexes
#[derive(Clone)]
pub struct AnyToken {
    info: Arc<TokenInfo>,
}

impl AnyToken {
    pub fn id(&self) -> TokenId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    /// `TypeId` of the service value this token promises
    pub fn service_type(&self) -> TypeId {
        self.info.type_id
    }

    pub fn service_type_name(&self) -> &'static str {
        self.info.type_name
    }
}

impl<T> From<&Token<T>> for AnyToken {
    fn from(token: &Token<T>) -> Self {
        token.erase()
    }
}

impl<T> From<Token<T>> for AnyToken {
    fn from(token: Token<T>) -> Self {
        token.erase()
    }
}

impl PartialEq for AnyToken {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl Eq for AnyToken {}

impl Hash for AnyToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.info.id.hash(state);
    }
}

impl fmt::Debug for AnyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyToken({} {})", self.info.name, self.info.id)
    }
}

impl fmt::Display for AnyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Settings;

    #[test]
    fn test_same_name_distinct_identity() {
        let a: Token<Settings> = Token::new("settings");
        let b: Token<Settings> = Token::new("settings");
        assert_ne!(a, b);
        assert_ne!(a.erase(), b.erase());

        let mut set = HashSet::new();
        set.insert(a.erase());
        set.insert(b.erase());
        set.insert(a.clone().erase());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_erased_token_keeps_type_and_description() {
        let token: Token<Settings> = Token::with_description("settings", "User settings registry");
        let erased = AnyToken::from(&token);
        assert_eq!(erased.service_type(), TypeId::of::<Settings>());
        assert_eq!(erased.description(), Some("User settings registry"));
        assert_eq!(erased.to_string(), "settings");
    }
}
