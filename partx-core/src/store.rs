// partx_core/src/store.rs
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// A freshly created output file.
pub trait PartFile: Write + Send {
    /// Flush contents to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl PartFile for fs::File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Filesystem operations the splitter needs for its output artifacts.
///
/// `create_new` must fail with `AlreadyExists` rather than truncate.
pub trait PartStore: Send + Sync {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn PartFile>>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsStore;

impl PartStore for FsStore {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn PartFile>> {
        let f = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(f))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub enum Backend {
    Fs,
}

pub fn open_store(backend: Backend) -> Box<dyn PartStore> {
    match backend {
        Backend::Fs => Box::new(FsStore),
    }
}
