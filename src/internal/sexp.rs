//! Canonical S-expressions, the container syntax of G10 key files.
//!
//! Only the canonical form is produced and accepted: lists in parentheses
//! and atoms written as `<decimal length>:<raw bytes>`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sexp {
    Atom(Vec<u8>),
    List(Vec<Sexp>),
}

impl Sexp {
    pub(crate) fn atom(data: impl AsRef<[u8]>) -> Self {
        Sexp::Atom(data.as_ref().to_vec())
    }

    /// A `(name value)` pair.
    pub(crate) fn pair(name: &str, value: impl AsRef<[u8]>) -> Self {
        Sexp::List(vec![Sexp::atom(name), Sexp::atom(value)])
    }

    pub(crate) fn as_atom(&self) -> Option<&[u8]> {
        match self {
            Sexp::Atom(data) => Some(data),
            Sexp::List(_) => None,
        }
    }

    /// Find the first sub-list whose head atom is `name`.
    pub(crate) fn lookup(&self, name: &str) -> Option<&Sexp> {
        match self {
            Sexp::List(items) => items.iter().find(|item| match item {
                Sexp::List(inner) => inner
                    .first()
                    .and_then(Sexp::as_atom)
                    .map(|head| head == name.as_bytes())
                    .unwrap_or(false),
                Sexp::Atom(_) => false,
            }),
            Sexp::Atom(_) => None,
        }
    }

    /// Value atom of a `(name value)` pair found by [`Sexp::lookup`].
    pub(crate) fn lookup_value(&self, name: &str) -> Option<&[u8]> {
        match self.lookup(name)? {
            Sexp::List(inner) => inner.get(1).and_then(Sexp::as_atom),
            Sexp::Atom(_) => None,
        }
    }

    pub(crate) fn head(&self) -> Option<&[u8]> {
        match self {
            Sexp::List(items) => items.first().and_then(Sexp::as_atom),
            Sexp::Atom(_) => None,
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Sexp::Atom(data) => {
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(data);
            }
            Sexp::List(items) => {
                buf.push(b'(');
                for item in items {
                    item.write(buf);
                }
                buf.push(b')');
            }
        }
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Sexp> {
        let mut pos = 0;
        let sexp = parse_at(data, &mut pos, 0)?;
        if data[pos..].iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(Error::BadFormat("trailing data after s-expression".to_string()));
        }
        Ok(sexp)
    }
}

const MAX_DEPTH: usize = 32;

fn parse_at(data: &[u8], pos: &mut usize, depth: usize) -> Result<Sexp> {
    if depth > MAX_DEPTH {
        return Err(Error::BadFormat("s-expression nested too deep".to_string()));
    }
    while *pos < data.len() && data[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    match data.get(*pos) {
        Some(b'(') => {
            *pos += 1;
            let mut items = Vec::new();
            loop {
                match data.get(*pos) {
                    Some(b')') => {
                        *pos += 1;
                        return Ok(Sexp::List(items));
                    }
                    Some(_) => items.push(parse_at(data, pos, depth + 1)?),
                    None => {
                        return Err(Error::BadFormat("unterminated s-expression".to_string()))
                    }
                }
            }
        }
        Some(b) if b.is_ascii_digit() => {
            let start = *pos;
            while *pos < data.len() && data[*pos].is_ascii_digit() {
                *pos += 1;
            }
            if data.get(*pos) != Some(&b':') {
                return Err(Error::BadFormat("expected ':' after atom length".to_string()));
            }
            let len: usize = std::str::from_utf8(&data[start..*pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::BadFormat("invalid atom length".to_string()))?;
            *pos += 1;
            let end = pos
                .checked_add(len)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| Error::BadFormat("atom exceeds input".to_string()))?;
            let atom = data[*pos..end].to_vec();
            *pos = end;
            Ok(Sexp::Atom(atom))
        }
        Some(_) => Err(Error::BadFormat("unexpected byte in s-expression".to_string())),
        None => Err(Error::BadFormat("empty s-expression".to_string())),
    }
}
