//! Record framing over byte streams.
//!
//! [`LineReader`] yields newline-delimited records out of a fixed read
//! window, splicing partial records across refills through a carry buffer
//! capped at [`MAX_RECORD_LEN`]. Records that would overflow the carry are
//! dropped up to the next newline and counted instead of truncated. EOF
//! flushes a pending carry as a final unterminated record.
//!
//! [`RecordWriter`] is the matching output side: records accumulate in a
//! write window flushed on fill, each terminated with a newline.

use std::io::{self, Read, Write};

use memchr::memchr;

use crate::MAX_RECORD_LEN;

/// Default read window. Large enough that most records are returned as
/// window sub-slices without touching the carry.
const READ_WINDOW_BYTES: usize = 256 * 1024;
const WRITE_WINDOW_BYTES: usize = 256 * 1024;

/// Buffered record reader with carry-over framing.
pub struct LineReader<R> {
    inner: R,
    window: Box<[u8]>,
    start: usize,
    end: usize,
    carry: Box<[u8]>,
    carry_len: usize,
    /// Discarding an oversize record until its newline.
    dropping: bool,
    eof: bool,
    bytes_in: u64,
    emitted: u64,
    dropped: u64,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> LineReader<R> {
        LineReader::with_capacity(READ_WINDOW_BYTES, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> LineReader<R> {
        LineReader {
            inner,
            window: vec![0; capacity.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
            carry: vec![0; MAX_RECORD_LEN].into_boxed_slice(),
            carry_len: 0,
            dropping: false,
            eof: false,
            bytes_in: 0,
            emitted: 0,
            dropped: 0,
        }
    }

    /// Yields the next record without its newline, or `None` at end of
    /// stream. The returned slice is valid until the next call.
    pub fn next_record(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            if self.start < self.end {
                match memchr(b'\n', &self.window[self.start..self.end]) {
                    Some(offset) => {
                        let line_start = self.start;
                        self.start += offset + 1;
                        if self.dropping {
                            // Tail of an oversize record; resynchronised now.
                            self.dropping = false;
                            self.dropped += 1;
                            continue;
                        }
                        if self.carry_len > 0 {
                            if self.carry_len + offset > MAX_RECORD_LEN {
                                self.carry_len = 0;
                                self.dropped += 1;
                                continue;
                            }
                            let len = self.carry_len + offset;
                            self.carry[self.carry_len..len]
                                .copy_from_slice(&self.window[line_start..line_start + offset]);
                            self.carry_len = 0;
                            self.emitted += 1;
                            return Ok(Some(&self.carry[..len]));
                        }
                        if offset > MAX_RECORD_LEN {
                            self.dropped += 1;
                            continue;
                        }
                        self.emitted += 1;
                        return Ok(Some(&self.window[line_start..line_start + offset]));
                    }
                    None => {
                        // Partial record: stash it and refill.
                        let rest = self.end - self.start;
                        if !self.dropping {
                            if self.carry_len + rest > MAX_RECORD_LEN {
                                self.carry_len = 0;
                                self.dropping = true;
                            } else {
                                self.carry[self.carry_len..self.carry_len + rest]
                                    .copy_from_slice(&self.window[self.start..self.end]);
                                self.carry_len += rest;
                            }
                        }
                        self.start = self.end;
                    }
                }
            } else if self.eof {
                if self.dropping {
                    self.dropping = false;
                    self.dropped += 1;
                }
                if self.carry_len > 0 {
                    // Final unterminated record.
                    let len = self.carry_len;
                    self.carry_len = 0;
                    self.emitted += 1;
                    return Ok(Some(&self.carry[..len]));
                }
                return Ok(None);
            } else {
                let n = self.inner.read(&mut self.window)?;
                self.start = 0;
                self.end = n;
                self.bytes_in += n as u64;
                if n == 0 {
                    self.eof = true;
                }
            }
        }
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Records returned to the caller.
    pub fn records_emitted(&self) -> u64 {
        self.emitted
    }

    /// Oversize records discarded to their next newline.
    pub fn records_dropped(&self) -> u64 {
        self.dropped
    }
}

/// Buffered record writer; every record is newline-terminated.
pub struct RecordWriter<W: Write> {
    inner: W,
    window: Box<[u8]>,
    len: usize,
    bytes_out: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> RecordWriter<W> {
        RecordWriter::with_capacity(WRITE_WINDOW_BYTES, inner)
    }

    pub fn with_capacity(capacity: usize, inner: W) -> RecordWriter<W> {
        RecordWriter {
            inner,
            window: vec![0; capacity.max(2)].into_boxed_slice(),
            len: 0,
            bytes_out: 0,
        }
    }

    pub fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        if self.len + record.len() + 1 > self.window.len() {
            self.flush_window()?;
        }
        if record.len() + 1 > self.window.len() {
            // Larger than the window: write through.
            self.inner.write_all(record)?;
            self.inner.write_all(b"\n")?;
        } else {
            self.window[self.len..self.len + record.len()].copy_from_slice(record);
            self.len += record.len();
            self.window[self.len] = b'\n';
            self.len += 1;
        }
        // Buffered bytes count as written.
        self.bytes_out += record.len() as u64 + 1;
        Ok(())
    }

    fn flush_window(&mut self) -> io::Result<()> {
        if self.len > 0 {
            self.inner.write_all(&self.window[..self.len])?;
            self.len = 0;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.flush_window()?;
        self.inner.flush()
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(reader: &mut LineReader<&[u8]>) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        while let Some(r) = reader.next_record().unwrap() {
            records.push(r.to_vec());
        }
        records
    }

    #[test]
    fn frames_simple_records() {
        let mut r = LineReader::new(b"one\ntwo\nthree\n".as_slice());
        assert_eq!(read_all(&mut r), vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(r.bytes_in(), 14);
        assert_eq!(r.records_emitted(), 3);
        assert_eq!(r.records_dropped(), 0);
    }

    #[test]
    fn empty_records_are_preserved() {
        let mut r = LineReader::new(b"\n\nx\n".as_slice());
        assert_eq!(read_all(&mut r), vec![b"".to_vec(), b"".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn carry_splices_records_across_refills() {
        // A 4-byte window forces every record through the carry.
        let mut r = LineReader::with_capacity(4, b"abcdefghij\nklmno\n".as_slice());
        assert_eq!(
            read_all(&mut r),
            vec![b"abcdefghij".to_vec(), b"klmno".to_vec()]
        );
        assert_eq!(r.bytes_in(), 17);
    }

    #[test]
    fn eof_flushes_unterminated_record() {
        let mut r = LineReader::with_capacity(4, b"abc\ntail".as_slice());
        assert_eq!(read_all(&mut r), vec![b"abc".to_vec(), b"tail".to_vec()]);
    }

    #[test]
    fn oversize_records_are_dropped_to_the_next_newline() {
        let mut input = vec![b'x'; MAX_RECORD_LEN + 1];
        input.push(b'\n');
        input.extend_from_slice(b"ok\n");
        let mut r = LineReader::with_capacity(512, input.as_slice());
        assert_eq!(read_all(&mut r), vec![b"ok".to_vec()]);
        assert_eq!(r.records_dropped(), 1);
        assert_eq!(r.records_emitted(), 1);
    }

    #[test]
    fn record_of_exactly_the_ceiling_survives() {
        let mut input = vec![b'y'; MAX_RECORD_LEN];
        input.push(b'\n');
        let mut r = LineReader::with_capacity(512, input.as_slice());
        let records = read_all(&mut r);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), MAX_RECORD_LEN);
        assert_eq!(r.records_dropped(), 0);
    }

    #[test]
    fn oversize_tail_without_newline_is_dropped_at_eof() {
        let mut input = b"fine\n".to_vec();
        input.extend(vec![b'z'; MAX_RECORD_LEN + 5]);
        let mut r = LineReader::with_capacity(1024, input.as_slice());
        assert_eq!(read_all(&mut r), vec![b"fine".to_vec()]);
        assert_eq!(r.records_dropped(), 1);
    }

    #[test]
    fn writer_buffers_terminates_and_counts() {
        let mut out = Vec::new();
        let mut w = RecordWriter::with_capacity(8, &mut out);
        w.write_record(b"ab").unwrap();
        // Still buffered.
        assert_eq!(w.bytes_out(), 3);
        w.write_record(b"cdef").unwrap();
        w.write_record(b"a record far larger than the window").unwrap();
        w.flush().unwrap();
        drop(w);
        assert_eq!(out, b"ab\ncdef\na record far larger than the window\n");
    }
}
