use std::slice::Iter;

use smol_str::SmolStr;

/// Represents a single SIP header field as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

/// Collection of SIP headers preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header to the collection.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Inserts a header ahead of every other header.
    pub fn insert_first(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.insert(
            0,
            Header {
                name: name.into(),
                value: value.into(),
            },
        );
    }

    /// Removes every header with this name, returning the removed values in order.
    pub fn remove_all(&mut self, name: &str) -> Vec<SmolStr> {
        let mut removed = Vec::new();
        self.0.retain(|h| {
            if h.name.eq_ignore_ascii_case(name) {
                removed.push(h.value.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Returns an iterator over the stored headers.
    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    /// Returns the number of headers present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the collection does not contain any headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Finds the first header whose name matches ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Returns all headers with the given name, preserving original order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
