//! Input and output endpoints.
//!
//! Operations read their whole input and produce their whole output in
//! memory; endpoints only decide where the bytes come from and where they
//! end up. An [`Output`] is written to its destination when the operation
//! finishes it, and only kept if the operation succeeded.

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::armor::{armor_bytes, ArmorType};
use crate::error::{Error, Result};

enum Source {
    Memory(Vec<u8>),
    Path(PathBuf),
    Reader(Box<dyn Read>),
}

/// A byte source for operations and keyring loading.
pub struct Input {
    source: Source,
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Memory(data) => write!(f, "Input::Memory({} bytes)", data.len()),
            Source::Path(path) => write!(f, "Input::Path({})", path.display()),
            Source::Reader(_) => write!(f, "Input::Reader"),
        }
    }
}

impl Input {
    pub fn from_memory(data: impl Into<Vec<u8>>) -> Self {
        Self {
            source: Source::Memory(data.into()),
        }
    }

    /// Read from a file, or point at a directory (G10 key directories).
    ///
    /// # Errors
    /// [`Error::Access`] if the path does not exist.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Access(format!("{} does not exist", path.display())));
        }
        Ok(Self {
            source: Source::Path(path.to_path_buf()),
        })
    }

    /// Read from a caller-supplied reader, once.
    pub fn from_callback(reader: impl Read + 'static) -> Self {
        Self {
            source: Source::Reader(Box::new(reader)),
        }
    }

    /// Directory this input points at, if any.
    pub(crate) fn dir_path(&self) -> Option<&Path> {
        match &self.source {
            Source::Path(path) if path.is_dir() => Some(path),
            _ => None,
        }
    }

    /// All remaining bytes. Memory and file inputs may be read repeatedly.
    pub(crate) fn read_all(&mut self) -> Result<Vec<u8>> {
        match &mut self.source {
            Source::Memory(data) => Ok(data.clone()),
            Source::Path(path) => {
                if path.is_dir() {
                    return Err(Error::Read(format!("{} is a directory", path.display())));
                }
                fs::read(&path).map_err(|e| Error::Read(e.to_string()))
            }
            Source::Reader(reader) => {
                let mut buf = Vec::new();
                reader
                    .read_to_end(&mut buf)
                    .map_err(|e| Error::Read(e.to_string()))?;
                Ok(buf)
            }
        }
    }
}

enum Sink {
    Memory,
    Path { path: PathBuf, overwrite: bool },
    Writer(Box<dyn Write>),
    Callback(Box<dyn FnMut(&[u8]) -> bool>),
    Armor { base: Box<Output>, kind: ArmorType },
    Null,
}

/// A byte sink for operation results and keyring saving.
pub struct Output {
    sink: Sink,
    buf: Vec<u8>,
    keep: bool,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.sink {
            Sink::Memory => "Memory",
            Sink::Path { .. } => "Path",
            Sink::Writer(_) => "Writer",
            Sink::Callback(_) => "Callback",
            Sink::Armor { .. } => "Armor",
            Sink::Null => "Null",
        };
        write!(f, "Output::{}({} bytes pending)", kind, self.buf.len())
    }
}

impl Output {
    fn new(sink: Sink) -> Self {
        Self {
            sink,
            buf: Vec::new(),
            keep: false,
        }
    }

    pub fn to_memory() -> Self {
        Self::new(Sink::Memory)
    }

    /// Write to a file. The file is written to a temporary sibling first and
    /// moved into place once the operation finishes successfully.
    ///
    /// # Errors
    /// [`Error::Access`] if the file exists and `overwrite` is false.
    pub fn to_path(path: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let path = path.as_ref();
        if path.is_file() && !overwrite {
            return Err(Error::Access(format!("{} already exists", path.display())));
        }
        Ok(Self::new(Sink::Path {
            path: path.to_path_buf(),
            overwrite,
        }))
    }

    /// Write to an already opened file or any other writer.
    pub fn to_file(writer: impl Write + 'static) -> Self {
        Self::new(Sink::Writer(Box::new(writer)))
    }

    /// Hand the finished bytes to a callback. Returning `false` fails the
    /// write.
    pub fn to_callback(callback: impl FnMut(&[u8]) -> bool + 'static) -> Self {
        Self::new(Sink::Callback(Box::new(callback)))
    }

    /// Wrap another output, ASCII-armoring everything written through it.
    ///
    /// # Arguments
    /// * `base` - Destination of the armored text
    /// * `kind` - "message", "public key", "secret key", "signature" or "cleartext"
    pub fn to_armor(base: Output, kind: &str) -> Result<Self> {
        let kind = ArmorType::from_name(kind)
            .ok_or_else(|| Error::BadParameters(format!("unknown armor type: {}", kind)))?;
        Ok(Self::new(Sink::Armor {
            base: Box::new(base),
            kind,
        }))
    }

    /// Discard everything.
    pub fn null() -> Self {
        Self::new(Sink::Null)
    }

    /// Contents of a memory output, or of the memory output under an armor
    /// wrapper. With `copy` false the buffer is handed over and the output
    /// is left empty.
    pub fn memory_get_buf(&mut self, copy: bool) -> Result<Vec<u8>> {
        match &mut self.sink {
            Sink::Memory => {
                if copy {
                    Ok(self.buf.clone())
                } else {
                    Ok(std::mem::take(&mut self.buf))
                }
            }
            Sink::Armor { base, .. } => base.memory_get_buf(copy),
            _ => Err(Error::BadParameters("not a memory output".to_string())),
        }
    }

    /// Whether the last finished operation asked for the output to be kept.
    pub fn is_kept(&self) -> bool {
        self.keep
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::Path { path, .. } => Some(path),
            _ => None,
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Deliver the pending bytes to the destination. With `keep` false the
    /// pending bytes are dropped and file destinations are left untouched.
    pub(crate) fn finish(&mut self, keep: bool) -> Result<()> {
        self.keep = keep;
        if !keep {
            if !matches!(self.sink, Sink::Memory) {
                self.buf.clear();
            }
            if let Sink::Armor { base, .. } = &mut self.sink {
                base.finish(false)?;
            }
            return Ok(());
        }

        match &mut self.sink {
            Sink::Memory => Ok(()),
            Sink::Null => {
                self.buf.clear();
                Ok(())
            }
            Sink::Path { path, overwrite } => {
                let data = std::mem::take(&mut self.buf);
                if path.is_file() && !*overwrite {
                    return Err(Error::Access(format!("{} already exists", path.display())));
                }
                let tmp = tmp_sibling(path);
                fs::write(&tmp, &data).map_err(|e| Error::Write(e.to_string()))?;
                fs::rename(&tmp, &path).map_err(|e| {
                    let _ = fs::remove_file(&tmp);
                    Error::Write(e.to_string())
                })
            }
            Sink::Writer(writer) => {
                let data = std::mem::take(&mut self.buf);
                writer
                    .write_all(&data)
                    .and_then(|_| writer.flush())
                    .map_err(|e| Error::Write(e.to_string()))
            }
            Sink::Callback(callback) => {
                let data = std::mem::take(&mut self.buf);
                if callback(&data) {
                    Ok(())
                } else {
                    Err(Error::Write("output callback failed".to_string()))
                }
            }
            Sink::Armor { base, kind } => {
                let data = std::mem::take(&mut self.buf);
                let armored = armor_bytes(&data, *kind)?;
                base.write(&armored);
                base.finish(true)
            }
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let mut input = Input::from_memory(b"abc".to_vec());
        assert_eq!(input.read_all().unwrap(), b"abc");
        // memory inputs can be read again
        assert_eq!(input.read_all().unwrap(), b"abc");

        let mut output = Output::to_memory();
        output.write(b"xyz");
        output.finish(true).unwrap();
        assert!(output.is_kept());
        assert_eq!(output.memory_get_buf(true).unwrap(), b"xyz");
        assert_eq!(output.memory_get_buf(false).unwrap(), b"xyz");
        assert!(output.memory_get_buf(false).unwrap().is_empty());
    }

    #[test]
    fn test_path_output_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");

        let mut output = Output::to_path(&target, false).unwrap();
        output.write(b"data");
        output.finish(false).unwrap();
        assert!(!target.exists());

        output.write(b"data");
        output.finish(true).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"data");

        assert!(Output::to_path(&target, false).is_err());
        assert!(Output::to_path(&target, true).is_ok());
    }

    #[test]
    fn test_missing_input_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Input::from_path(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::Access(_)));
        let mut dir_input = Input::from_path(dir.path()).unwrap();
        assert!(dir_input.dir_path().is_some());
        assert!(dir_input.read_all().is_err());
    }

    #[test]
    fn test_callback_output() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut output = Output::to_callback(move |data| {
            sink.borrow_mut().extend_from_slice(data);
            true
        });
        output.write(b"hello");
        output.finish(true).unwrap();
        assert_eq!(&*seen.borrow(), b"hello");

        let mut failing = Output::to_callback(|_| false);
        failing.write(b"x");
        assert!(failing.finish(true).is_err());
    }

    #[test]
    fn test_armor_output() {
        let mut output = Output::to_armor(Output::to_memory(), "message").unwrap();
        output.write(&[0xc3, 0x04, 0x04, 0x03]);
        output.finish(true).unwrap();
        let text = String::from_utf8(output.memory_get_buf(true).unwrap()).unwrap();
        assert!(text.starts_with("-----BEGIN PGP MESSAGE-----"));
        assert!(Output::to_armor(Output::null(), "bogus").is_err());
    }
}
