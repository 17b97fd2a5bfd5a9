//! File System module
//!
//! Flat, RAM-backed file store behind POSIX-ish `File` handles. Files have
//! a fixed size: `write_at` never grows them, matching the on-disk layout
//! the loader and mmap write-back assume. The single [`FILESYS_LOCK`] is
//! held by callers across every file-system call made on behalf of a page.

pub mod ramfs;

use alloc::sync::Arc;
use lazy_static::lazy_static;
use spin::Mutex;

/// Result type for file operations
pub type FsResult<T> = Result<T, FsError>;

/// File operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No file with the given name
    NotFound,
    /// A file with the given name already exists
    AlreadyExists,
}

lazy_static! {
    /// The global file-system lock.
    ///
    /// The file system itself is not reentrant; every read or write issued
    /// while servicing a page (lazy load, write-back, swap-in) is bracketed
    /// by this mutex.
    pub static ref FILESYS_LOCK: Mutex<()> = Mutex::new(());
}

/// Create a file with the given contents.
pub fn create(name: &str, data: &[u8]) -> FsResult<()> {
    ramfs::insert(name, data)
}

/// Open an existing file. Each handle has its own position.
pub fn open(name: &str) -> FsResult<File> {
    let inode = ramfs::lookup(name).ok_or(FsError::NotFound)?;
    Ok(File {
        inode,
        pos: 0,
        write_denied: false,
    })
}

/// Remove a file from the store. Open handles keep their inode alive.
pub fn remove(name: &str) -> FsResult<()> {
    ramfs::remove(name)
}

/// An open file: a shared inode plus an independent position.
pub struct File {
    inode: Arc<ramfs::Inode>,
    pos: usize,
    write_denied: bool,
}

impl File {
    /// Open the same inode again with a fresh position.
    pub fn reopen(&self) -> File {
        File {
            inode: Arc::clone(&self.inode),
            pos: 0,
            write_denied: false,
        }
    }

    /// Duplicate the handle, position included.
    pub fn duplicate(&self) -> File {
        File {
            inode: Arc::clone(&self.inode),
            pos: self.pos,
            write_denied: false,
        }
    }

    /// File size in bytes.
    pub fn length(&self) -> usize {
        self.inode.length()
    }

    /// Read up to `buf.len()` bytes at `offset`; returns the count read.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        self.inode.read_at(buf, offset)
    }

    /// Write up to `buf.len()` bytes at `offset`; returns the count
    /// written. Never grows the file; returns 0 while writes are denied.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        self.inode.write_at(buf, offset)
    }

    /// Read from the current position, advancing it.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_at(buf, self.pos);
        self.pos += n;
        n
    }

    /// Write at the current position, advancing it.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.write_at(buf, self.pos);
        self.pos += n;
        n
    }

    /// Move the position.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Current position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Deny writes to the underlying inode (used on running executables).
    pub fn deny_write(&mut self) {
        if !self.write_denied {
            self.write_denied = true;
            self.inode.deny_write();
        }
    }

    /// Re-allow writes previously denied through this handle.
    pub fn allow_write(&mut self) {
        if self.write_denied {
            self.write_denied = false;
            self.inode.allow_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        // closing an executable re-allows writes to it
        self.allow_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_clamped_to_length() {
        create("fs-clamp.bin", &[1, 2, 3, 4, 5]).unwrap();
        let file = open("fs-clamp.bin").unwrap();
        assert_eq!(file.length(), 5);

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 0), 5);
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(file.read_at(&mut buf, 4), 1);
        assert_eq!(file.read_at(&mut buf, 5), 0);

        // writes never extend the file
        assert_eq!(file.write_at(&[9, 9, 9], 3), 2);
        assert_eq!(file.length(), 5);
        let mut tail = [0u8; 2];
        file.read_at(&mut tail, 3);
        assert_eq!(tail, [9, 9]);
        remove("fs-clamp.bin").unwrap();
    }

    #[test]
    fn reopen_has_independent_position() {
        create("fs-pos.bin", b"abcdef").unwrap();
        let mut a = open("fs-pos.bin").unwrap();
        let mut buf = [0u8; 3];
        a.read(&mut buf);
        assert_eq!(a.tell(), 3);

        let mut b = a.reopen();
        assert_eq!(b.tell(), 0);
        b.read(&mut buf);
        assert_eq!(&buf, b"abc");

        let mut c = a.duplicate();
        assert_eq!(c.tell(), 3);
        c.read(&mut buf);
        assert_eq!(&buf, b"def");
        remove("fs-pos.bin").unwrap();
    }

    #[test]
    fn deny_write_blocks_all_writers() {
        create("fs-deny.bin", b"xyz").unwrap();
        let mut exec = open("fs-deny.bin").unwrap();
        let other = open("fs-deny.bin").unwrap();

        exec.deny_write();
        assert_eq!(other.write_at(b"q", 0), 0);

        drop(exec); // close re-allows writes
        assert_eq!(other.write_at(b"q", 0), 1);
        remove("fs-deny.bin").unwrap();
    }

    #[test]
    fn create_rejects_duplicates() {
        create("fs-dup.bin", b"1").unwrap();
        assert_eq!(create("fs-dup.bin", b"2"), Err(FsError::AlreadyExists));
        assert_eq!(open("fs-missing.bin").err(), Some(FsError::NotFound));
        remove("fs-dup.bin").unwrap();
    }
}
