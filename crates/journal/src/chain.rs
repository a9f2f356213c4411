//! Segment writers
//!
//! A segment file is wrapped in a buffered writer, optionally LZ4 framed.
//! Readers pick the decoder from the file extension, so toggling
//! compression between restarts is safe.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use lz4_flex::frame::FrameEncoder;

/// Buffer size for segment writers
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Object-safe writer over one segment file
pub trait ChainWrite: Write + Send {
    /// Flush all buffered data to the underlying file
    fn flush_all(&mut self) -> io::Result<()>;

    /// Finish writing and close the writer (for compression finalization)
    fn finish(self: Box<Self>) -> io::Result<()>;

    /// Bytes accepted by this writer (pre-compression)
    fn bytes_written(&self) -> u64;
}

/// How segment files are written
#[derive(Debug, Clone, Copy)]
pub struct SegmentFormat {
    pub compress: bool,
    pub buffer_size: usize,
}

impl SegmentFormat {
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Wrap a freshly created file
    pub fn wrap(&self, file: File) -> Box<dyn ChainWrite> {
        let writer = BufWriter::with_capacity(self.buffer_size, file);
        if self.compress {
            Box::new(Lz4Chain {
                encoder: FrameEncoder::new(writer),
                bytes_written: 0,
            })
        } else {
            Box::new(PlainChain {
                writer,
                bytes_written: 0,
            })
        }
    }

    /// Extension appended after `.log`
    pub fn extension(&self) -> &'static str {
        if self.compress { ".log.lz4" } else { ".log" }
    }
}

struct PlainChain {
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl Write for PlainChain {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl ChainWrite for PlainChain {
    fn flush_all(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush_all()
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

struct Lz4Chain {
    encoder: FrameEncoder<BufWriter<File>>,
    bytes_written: u64,
}

impl Write for Lz4Chain {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl ChainWrite for Lz4Chain {
    fn flush_all(&mut self) -> io::Result<()> {
        self.encoder.flush()?;
        self.encoder.get_mut().flush()?;
        self.encoder.get_ref().get_ref().sync_data()
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        let mut writer = self.encoder.finish().map_err(io::Error::other)?;
        writer.flush()?;
        writer.get_ref().sync_data()
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
