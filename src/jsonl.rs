//! JSONL line IO: a reader over plain or zstd-compressed input and a small
//! buffered NDJSON writer.

use crate::util::{create_with_backoff, open_with_backoff};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zstd::stream::read::Decoder;

/// Counts on-disk (compressed) bytes pulled through the reader.
struct CountingReader<R: Read> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// True for `*.zst` paths.
pub fn is_zstd(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("zst")
}

/// Line reader over a `.jsonl` or `.jsonl.zst` file.
pub struct JsonlReader {
    rdr: Box<dyn BufRead>,
    consumed: Arc<AtomicU64>,
    line_no: u64,
}

impl JsonlReader {
    pub fn open(path: &Path, buf_bytes: usize) -> io::Result<Self> {
        let file = open_with_backoff(path, 16, 50)?;
        let consumed = Arc::new(AtomicU64::new(0));
        let counted = CountingReader { inner: file, counter: consumed.clone() };
        let cap = buf_bytes.max(8 * 1024);
        let rdr: Box<dyn BufRead> = if is_zstd(path) {
            let mut decoder = Decoder::new(counted)?;
            // Large windows show up in big monthly dumps.
            decoder.window_log_max(31)?;
            Box::new(BufReader::with_capacity(cap, decoder))
        } else {
            Box::new(BufReader::with_capacity(cap, counted))
        };
        Ok(Self { rdr, consumed, line_no: 0 })
    }

    /// Read the next line into `buf` without its `\r?\n`. Returns the raw byte
    /// count (0 on EOF).
    pub fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        buf.clear();
        let n = self.rdr.read_line(buf)?;
        if n == 0 {
            return Ok(0);
        }
        self.line_no += 1;
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        Ok(n)
    }

    /// 1-based number of the line most recently returned.
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Bytes consumed from disk so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

/// Buffered NDJSON writer. Each `write_line` appends one `\n`-terminated line.
pub struct NdjsonWriter {
    path: PathBuf,
    w: Option<BufWriter<File>>,
}

impl NdjsonWriter {
    pub fn create(path: &Path, buf_bytes: usize) -> io::Result<Self> {
        let f = create_with_backoff(path, 16, 50)?;
        Ok(Self { path: path.to_path_buf(), w: Some(BufWriter::with_capacity(buf_bytes.max(8 * 1024), f)) })
    }

    #[inline]
    pub fn write_line(&mut self, s: &str) -> io::Result<()> {
        if let Some(w) = &mut self.w {
            w.write_all(s.as_bytes())?;
            w.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(mut self) -> io::Result<()> {
        if let Some(mut w) = self.w.take() {
            w.flush()?;
        }
        Ok(())
    }
}
