use super::name::Name;
use std::error;
use std::fmt;

/// Error that occurred when trying to decode a header from [`Headers`](crate::Headers).
#[derive(Debug)]
pub struct HeaderError {
    repr: Repr,
}

#[derive(Debug)]
enum Repr {
    Missing(Name),
    Malformed(&'static str),
}

impl HeaderError {
    pub fn missing(name: Name) -> Self {
        HeaderError {
            repr: Repr::Missing(name),
        }
    }

    /// Build a malformed-header error naming the type that failed to parse.
    pub fn malformed<T>() -> Self {
        HeaderError {
            repr: Repr::Malformed(std::any::type_name::<T>()),
        }
    }

    pub const fn is_missing(&self) -> bool {
        matches!(&self.repr, Repr::Missing(..))
    }
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Missing(name) => write!(f, "header {:?} is missing", name),
            Repr::Malformed(ty) => write!(f, "header could not be parsed as {}", ty),
        }
    }
}

impl error::Error for HeaderError {}
