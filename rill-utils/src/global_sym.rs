//! A globally interned symbol type backed by a process-wide string pool.

use std::sync::{Mutex, OnceLock};
use string_interner::{backend::BucketBackend, symbol::SymbolU32, StringInterner};

/// A globally interned symbol. Copies are cheap and comparisons are
/// index comparisons on the pool.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GSym(SymbolU32);

type Pool = StringInterner<BucketBackend>;

fn pool() -> &'static Mutex<Pool> {
    static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(Pool::new()))
}

impl GSym {
    /// Intern a string into the global symbol table.
    pub fn new(s: impl AsRef<str>) -> Self {
        s.as_ref().into()
    }

    /// Resolve this symbol to the string stored in the global table.
    /// The bucket backend guarantees the resolved string is never moved,
    /// so the returned reference is valid for the life of the process.
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }
}

impl From<&str> for GSym {
    fn from(s: &str) -> Self {
        GSym(pool().lock().unwrap().get_or_intern(s))
    }
}

impl From<String> for GSym {
    fn from(s: String) -> Self {
        GSym::from(s.as_str())
    }
}

impl From<&String> for GSym {
    fn from(s: &String) -> Self {
        GSym::from(s.as_str())
    }
}

impl From<GSym> for &'static str {
    fn from(sym: GSym) -> Self {
        let pool = pool().lock().unwrap();
        let s = pool.resolve(sym.0).expect("symbol missing from global pool");
        // SAFETY: the bucket backend never deallocates or moves interned
        // strings, and the pool itself is never dropped.
        unsafe { std::mem::transmute::<&str, &'static str>(s) }
    }
}

impl std::fmt::Debug for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::fmt::Display for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_str(), f)
    }
}
