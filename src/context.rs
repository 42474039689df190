//! Immutable per-request context.
//!
//! A [`Context`] is a persistent, singly-linked chain of key/value bindings.
//! [`Context::with_value`] never touches the receiver: it returns a new
//! context whose newest binding points back at the old chain. Lookups walk
//! from the newest binding towards the root and stop at the first key match,
//! so re-binding a key shadows the older value without disturbing anyone who
//! still holds the parent.
//!
//! ```text
//! base ─────────────► (db)
//! ctx  = base + user ► (user) ─► (db)
//! ctx2 = ctx  + user ► (user') ─► (user) ─► (db)
//! ```
//!
//! Every node sits behind an `Arc`, so cloning a context is one atomic
//! increment and a context can be read from any number of threads at once.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Identifies one binding in a [`Context`].
///
/// Keys built with [`ContextKey::new`] never collide with the keys the
/// router uses internally, even when the names are spelled the same.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextKey(Repr);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Repr {
    User(Cow<'static, str>),
    Internal(&'static str),
}

impl ContextKey {
    /// A key usable in `const` position: `const USER: ContextKey = ContextKey::new("user");`
    pub const fn new(name: &'static str) -> Self {
        Self(Repr::User(Cow::Borrowed(name)))
    }

    pub(crate) const fn internal(name: &'static str) -> Self {
        Self(Repr::Internal(name))
    }

    pub fn name(&self) -> &str {
        match &self.0 {
            Repr::User(name) => name.as_ref(),
            Repr::Internal(name) => name,
        }
    }
}

impl From<&'static str> for ContextKey {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ContextKey {
    fn from(name: String) -> Self {
        Self(Repr::User(Cow::Owned(name)))
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a typed lookup produced nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("no value bound for key")]
    Absent,
    #[error("value bound for key has a different type")]
    WrongType,
}

struct Binding {
    key: ContextKey,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Binding>>,
}

/// Immutable, append-only key/value chain carried through every request.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Binding>>,
}

impl Context {
    /// The empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a child of `self` with one extra binding. `self` is unchanged.
    pub fn with_value<V>(&self, key: impl Into<ContextKey>, value: V) -> Context
    where
        V: Any + Send + Sync,
    {
        Context {
            head: Some(Arc::new(Binding {
                key: key.into(),
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Nearest binding for `key`, untyped.
    pub fn lookup(&self, key: &ContextKey) -> Option<&(dyn Any + Send + Sync + 'static)> {
        self.bindings()
            .find(|binding| binding.key == *key)
            .map(|binding| &*binding.value)
    }

    /// Nearest binding for `key`, downcast to `V`.
    ///
    /// Distinguishes a missing key from a binding of another type.
    pub fn try_value<V: Any>(&self, key: &ContextKey) -> Result<&V, ValueError> {
        self.lookup(key)
            .ok_or(ValueError::Absent)?
            .downcast_ref::<V>()
            .ok_or(ValueError::WrongType)
    }

    /// Nearest binding for `key` if it holds a `V`.
    pub fn value<V: Any>(&self, key: &ContextKey) -> Option<&V> {
        self.try_value(key).ok()
    }

    pub fn contains(&self, key: &ContextKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of bindings between this context and the root, shadowed ones included.
    pub fn depth(&self) -> usize {
        self.bindings().count()
    }

    fn bindings(&self) -> impl Iterator<Item = &Binding> {
        std::iter::successors(self.head.as_deref(), |binding| binding.parent.as_deref())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.bindings().map(|binding| binding.key.name()))
            .finish()
    }
}
