//! Byte Stream
//!
//! The minimal random-access contract the sections are written against:
//! seek, tell, read, write and flush. Any `Read + Write + Seek` type
//! qualifies, so piles run on `std::fs::File` or on an in-memory
//! `std::io::Cursor<Vec<u8>>` alike.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::error::{PileError, Result};

/// Random-access byte stream backing one section file
pub trait Stream {
    /// Move to an absolute offset
    fn seek_to(&mut self, offset: u64) -> Result<()>;

    /// Move to the end of the stream and return its length
    fn seek_end(&mut self) -> Result<u64>;

    /// Current absolute offset
    fn tell(&mut self) -> Result<u64>;

    /// Fill `buf` completely or fail with `StreamOperation`
    fn read_exactly(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` or fail with `StreamOperation`
    fn write_exactly(&mut self, buf: &[u8]) -> Result<()>;

    /// Push buffered writes to the backing store
    fn flush_stream(&mut self) -> Result<()>;
}

impl<T: Read + Write + Seek> Stream for T {
    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn seek_end(&mut self) -> Result<u64> {
        Ok(self.seek(SeekFrom::End(0))?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }

    fn read_exactly(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.read(&mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PileError::Io(e)),
            }
        }

        if done != buf.len() {
            return Err(PileError::StreamOperation {
                expected: buf.len(),
                actual: done,
            });
        }
        Ok(())
    }

    fn write_exactly(&mut self, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.write(&buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PileError::Io(e)),
            }
        }

        if done != buf.len() {
            return Err(PileError::StreamOperation {
                expected: buf.len(),
                actual: done,
            });
        }
        Ok(())
    }

    fn flush_stream(&mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}
