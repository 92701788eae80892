//! Structural cache keys and key filters.

use std::fmt;

/// One component of a [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
}

impl From<&str> for KeyPart {
  fn from(value: &str) -> Self {
    Self::Str(value.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(value: String) -> Self {
    Self::Str(value)
  }
}

impl From<&String> for KeyPart {
  fn from(value: &String) -> Self {
    Self::Str(value.clone())
  }
}

impl From<i64> for KeyPart {
  fn from(value: i64) -> Self {
    Self::Int(value)
  }
}

impl From<u32> for KeyPart {
  fn from(value: u32) -> Self {
    Self::Int(i64::from(value))
  }
}

impl From<bool> for KeyPart {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(Self::Null)
  }
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => f.write_str("null"),
      Self::Bool(b) => write!(f, "{}", b),
      Self::Int(i) => write!(f, "{}", i),
      Self::Str(s) => write!(f, "{:?}", s),
    }
  }
}

/// Ordered tuple identifying a logical query, e.g. `["restaurants", "all"]`.
///
/// Equality and hashing are structural over all parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
  pub fn new(root: impl Into<KeyPart>) -> Self {
    Self(vec![root.into()])
  }

  /// Append a component.
  pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
    self.0.push(part.into());
    self
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  /// True if `prefix` matches the leading parts of this key (or all of them).
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("[")?;
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{}", part)?;
    }
    f.write_str("]")
  }
}

/// Build a [`CacheKey`] from a list of parts.
///
/// ```ignore
/// let key = cache_key!["restaurants", "search", query];
/// ```
#[macro_export]
macro_rules! cache_key {
  ($root:expr $(, $part:expr)* $(,)?) => {
    $crate::cache::CacheKey::new($root)$(.with($part))*
  };
}

/// Selects cache entries for invalidation or eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
  /// Every entry
  All,
  /// Exactly this key
  Exact(CacheKey),
  /// This key and every key that extends it
  Prefix(CacheKey),
}

impl KeyFilter {
  pub fn matches(&self, key: &CacheKey) -> bool {
    match self {
      Self::All => true,
      Self::Exact(k) => k == key,
      Self::Prefix(prefix) => key.starts_with(prefix),
    }
  }
}
