use super::error::HeaderError;
use super::name::Name;
use super::{ConstNamed, DecodeValues, DynNamed, ExtendValues};
use crate::print::PrintCtx;
use bytesstr::BytesStr;
use std::fmt;

/// One or more raw header values stored under a single [`Name`].
///
/// SIP allows a header to occur multiple times (each occurrence becomes a
/// separate message line) or, for CSV-style headers, to be folded into one
/// comma-separated value. Either representation is accepted on read.
#[derive(Debug, Clone)]
pub enum OneOrMore {
    One(BytesStr),
    More(Vec<BytesStr>),
}

impl OneOrMore {
    pub fn push(&mut self, value: BytesStr) {
        match self {
            OneOrMore::One(first) => {
                *self = OneOrMore::More(vec![first.clone(), value]);
            }
            OneOrMore::More(values) => values.push(value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BytesStr> {
        match self {
            OneOrMore::One(value) => std::slice::from_ref(value).iter(),
            OneOrMore::More(values) => values.iter(),
        }
    }
}

struct Entry {
    name: Name,
    values: OneOrMore,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Entry {
            name: self.name.clone(),
            values: self.values.clone(),
        }
    }
}

/// Container for SIP message headers.
///
/// Backed by an insertion-ordered `Vec` rather than a hash map: SIP messages
/// rarely carry more than a dozen headers, and insertion order matters when
/// printing a message back onto the wire (e.g. `Max-Forwards` conventionally
/// precedes `Via`).
#[derive(Default)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Clone for Headers {
    fn clone(&self) -> Self {
        Headers {
            entries: self.entries.clone(),
        }
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.entries {
            map.entry(&entry.name.as_print_str(), &entry.values);
        }
        map.finish()
    }
}

impl Headers {
    #[inline]
    pub const fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Headers {
            entries: Vec::with_capacity(capacity),
        }
    }

    fn entry(&self, name: &Name) -> Option<&Entry> {
        self.entries.iter().find(|entry| &entry.name == name)
    }

    fn entry_mut(&mut self, name: &Name) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| &entry.name == name)
    }

    /// Insert a raw header value as parsed off the wire.
    pub fn insert<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Name>,
        V: Into<BytesStr>,
    {
        let name = name.into();

        if let Some(entry) = self.entry_mut(&name) {
            entry.values.push(value.into());
        } else {
            self.entries.push(Entry {
                name,
                values: OneOrMore::One(value.into()),
            });
        }
    }

    /// Returns `true` if a header named `H::NAME` is present.
    #[inline]
    pub fn contains<H: ConstNamed>(&self) -> bool {
        self.entry(&H::NAME).is_some()
    }

    /// Decode the header(s) stored under `name` using `H`'s [`DecodeValues`] impl.
    pub fn get<H>(&self, name: Name) -> Result<H, HeaderError>
    where
        H: DecodeValues,
    {
        let entry = self.entry(&name).ok_or_else(|| HeaderError::missing(name.clone()))?;

        let mut iter = entry.values.iter();

        H::decode(&mut iter)
            .map(|(_, header)| header)
            .map_err(|_| HeaderError::malformed::<H>())
    }

    /// Decode the header(s) stored under `H::NAME`.
    #[inline]
    pub fn get_named<H>(&self) -> Result<H, HeaderError>
    where
        H: ConstNamed + DecodeValues,
    {
        self.get(H::NAME)
    }

    /// Insert a header using its [`ConstNamed::NAME`].
    pub fn insert_named<H>(&mut self, header: &H)
    where
        H: ConstNamed + ExtendValues,
    {
        self.insert_type(H::NAME, header);
    }

    /// Insert a header at the front of the message using its [`ConstNamed::NAME`].
    pub fn insert_named_front<H>(&mut self, header: &H)
    where
        H: ConstNamed + ExtendValues,
    {
        self.insert_type_front(H::NAME, header);
    }

    /// Insert a header under an explicitly given `name`.
    ///
    /// Needed for headers like `From`/`To` that share a single type
    /// (`FromTo`) but differ by which [`Name`] they are stored under.
    pub fn insert_type<H>(&mut self, name: Name, header: &H)
    where
        H: ExtendValues,
    {
        let ctx = PrintCtx::default();

        if let Some(entry) = self.entry_mut(&name) {
            header.extend_values(ctx, &mut entry.values);
        } else {
            self.entries.push(Entry {
                name,
                values: header.create_values(ctx),
            });
        }
    }

    /// Like [`Headers::insert_type`] but inserts a new entry at the front.
    pub fn insert_type_front<H>(&mut self, name: Name, header: &H)
    where
        H: ExtendValues,
    {
        let ctx = PrintCtx::default();

        if let Some(entry) = self.entry_mut(&name) {
            header.extend_values(ctx, &mut entry.values);
        } else {
            self.entries.insert(
                0,
                Entry {
                    name,
                    values: header.create_values(ctx),
                },
            );
        }
    }

    /// Insert a header using a [`DynNamed`] implementation (i.e. whose name
    /// is only known at runtime).
    pub fn insert_dyn<H>(&mut self, header: &H)
    where
        H: DynNamed + ExtendValues,
    {
        self.insert_type(header.name(), header);
    }

    /// Copy every raw value stored under `name` in `self` into `other`.
    pub fn clone_into(&self, other: &mut Headers, name: Name) -> Result<(), HeaderError> {
        let entry = self.entry(&name).ok_or_else(|| HeaderError::missing(name.clone()))?;

        for value in entry.values.iter() {
            other.insert(name.clone(), value.clone());
        }

        Ok(())
    }

    /// Remove every header stored under `name` and return its raw values, if present.
    pub fn take(&mut self, name: Name) -> Option<OneOrMore> {
        let pos = self.entries.iter().position(|entry| entry.name == name)?;
        Some(self.entries.remove(pos).values)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            for value in entry.values.iter() {
                write!(f, "{}: {}\r\n", entry.name.as_print_str(), value)?;
            }
        }

        Ok(())
    }
}
