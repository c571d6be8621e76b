//! Framed journal reader
//!
//! Journal format, one frame per captured operation:
//!
//! ```text
//! WRITE <seq> <size> <path>\n<size raw payload bytes>
//! REMOVE <seq> <path>\n
//! REMOVE <seq> <size> <path>\n        (legacy layout, size ignored)
//! ```
//!
//! The journal may still be appended to while we read it, so a short, empty,
//! or otherwise malformed header is treated as a clean end of stream rather
//! than an error. The one condition that is surfaced is a write frame whose
//! declared payload size exceeds the bytes remaining: the pipeline must know
//! it stopped early so it does not advance its watermark past the last
//! complete record.

use crate::record::{JournalRecord, Operation};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("truncated record: sequence {sequence} declared {declared} payload bytes, got {got}")]
    Truncated {
        sequence: u64,
        declared: usize,
        got: usize,
    },

    #[error("journal read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Lazy, finite, non-restartable sequence of journal records
///
/// Yields records in stream order with no buffering beyond a single frame.
/// After yielding an error the iterator fuses.
pub struct JournalReader<R: BufRead> {
    input: R,
    done: bool,
}

impl JournalReader<BufReader<File>> {
    /// Open a journal file for reading
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> JournalReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    fn next_record(&mut self) -> Result<Option<JournalRecord>, JournalError> {
        let mut header = String::new();
        match self.input.read_line(&mut header) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            // A non-UTF-8 header means the producer was interrupted mid-frame
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let fields: Vec<&str> = header.split_whitespace().collect();
        if fields.len() < 3 {
            // Partial trailing frame; stop cleanly
            return Ok(None);
        }

        let operation = match classify_operation(fields[0]) {
            Some(op) => op,
            None => return Ok(None),
        };
        let sequence: u64 = match fields[1].parse() {
            Ok(seq) => seq,
            Err(_) => return Ok(None),
        };

        match operation {
            Operation::Remove => {
                // Legacy layout carries a size field before the path; detect
                // it by the third field being purely numeric with a fourth
                // field present.
                let path_fields = if fields.len() >= 4 && is_numeric(fields[2]) {
                    &fields[3..]
                } else {
                    &fields[2..]
                };
                Ok(Some(JournalRecord {
                    operation,
                    sequence,
                    payload_size: 0,
                    path: path_fields.join(" "),
                    payload: Vec::new(),
                }))
            }
            Operation::Write => {
                if fields.len() < 4 {
                    return Ok(None);
                }
                let payload_size: usize = match fields[2].parse() {
                    Ok(size) => size,
                    Err(_) => return Ok(None),
                };
                let path = fields[3..].join(" ");

                let mut payload = vec![0u8; payload_size];
                let got = read_up_to(&mut self.input, &mut payload)?;
                if got < payload_size {
                    return Err(JournalError::Truncated {
                        sequence,
                        declared: payload_size,
                        got,
                    });
                }

                Ok(Some(JournalRecord {
                    operation,
                    sequence,
                    payload_size,
                    path,
                    payload,
                }))
            }
        }
    }
}

impl<R: BufRead> Iterator for JournalReader<R> {
    type Item = Result<JournalRecord, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Map an operation token to an operation
///
/// Matching is substring-based and case-insensitive ("remove"/"write"),
/// mirroring what journal producers in the wild actually emit. Unknown
/// tokens end the stream.
fn classify_operation(token: &str) -> Option<Operation> {
    let lower = token.to_ascii_lowercase();
    if lower.contains("remove") {
        Some(Operation::Remove)
    } else if lower.contains("write") {
        Some(Operation::Write)
    } else {
        None
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Fill `buf` from `input`, returning how many bytes were actually read
fn read_up_to<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(journal: &[u8]) -> Vec<Result<JournalRecord, JournalError>> {
        JournalReader::new(Cursor::new(journal.to_vec())).collect()
    }

    #[test]
    fn test_single_write_frame() {
        let records = read_all(b"WRITE 1 5 /a/b.txt\nhello");
        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.operation, Operation::Write);
        assert_eq!(record.sequence, 1);
        assert_eq!(record.payload_size, 5);
        assert_eq!(record.path, "/a/b.txt");
        assert_eq!(record.payload, b"hello");
    }

    #[test]
    fn test_write_then_remove() {
        let records = read_all(b"WRITE 1 5 /a/b.txt\nhelloREMOVE 2 /a/b.txt\n");
        assert_eq!(records.len(), 2);
        let remove = records[1].as_ref().unwrap();
        assert_eq!(remove.operation, Operation::Remove);
        assert_eq!(remove.sequence, 2);
        assert_eq!(remove.path, "/a/b.txt");
        assert!(remove.payload.is_empty());
    }

    #[test]
    fn test_legacy_remove_with_size_field() {
        let records = read_all(b"REMOVE 7 0 /a/b.txt\n");
        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.operation, Operation::Remove);
        assert_eq!(record.path, "/a/b.txt");
    }

    #[test]
    fn test_remove_with_numeric_looking_path() {
        // Three fields: the third is the path even if it looks numeric
        let records = read_all(b"REMOVE 7 123\n");
        assert_eq!(records[0].as_ref().unwrap().path, "123");
    }

    #[test]
    fn test_lowercase_and_decorated_tokens() {
        let records = read_all(b"write 1 2 /x\nhiremove_v2 2 /x\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref().unwrap().operation, Operation::Write);
        assert_eq!(records[1].as_ref().unwrap().operation, Operation::Remove);
    }

    #[test]
    fn test_empty_stream() {
        assert!(read_all(b"").is_empty());
        assert!(read_all(b"\n").is_empty());
    }

    #[test]
    fn test_short_header_ends_stream_cleanly() {
        // One good frame, then a partial header the producer never finished
        let records = read_all(b"WRITE 1 2 /x\nokWRITE 2\n");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_ok());
    }

    #[test]
    fn test_unknown_operation_ends_stream_cleanly() {
        let records = read_all(b"WRITE 1 2 /x\nokFSYNC 2 3 /y\nabc");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_garbage_sequence_ends_stream_cleanly() {
        let records = read_all(b"WRITE abc 2 /x\n");
        assert!(records.is_empty());
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let records = read_all(b"WRITE 1 2 /x\nokWRITE 2 100 /y\nonly-a-few-bytes");
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        match records[1].as_ref().unwrap_err() {
            JournalError::Truncated {
                sequence,
                declared,
                got,
            } => {
                assert_eq!(*sequence, 2);
                assert_eq!(*declared, 100);
                assert_eq!(*got, 16);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_reader_fuses_after_error() {
        let mut reader = JournalReader::new(Cursor::new(b"WRITE 1 100 /y\nshort".to_vec()));
        assert!(matches!(reader.next(), Some(Err(_))));
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_path_with_spaces() {
        let records = read_all(b"WRITE 1 2 /dir/my file.txt\nok");
        assert_eq!(records[0].as_ref().unwrap().path, "/dir/my file.txt");
    }

    #[test]
    fn test_zero_length_write() {
        let records = read_all(b"WRITE 9 0 /empty\n");
        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.payload_size, 0);
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_binary_payload_preserved() {
        let mut journal = b"WRITE 1 4 /bin\n".to_vec();
        journal.extend_from_slice(&[0x00, 0xFF, 0x0A, 0x7F]);
        let records = read_all(&journal);
        assert_eq!(records[0].as_ref().unwrap().payload, vec![0x00, 0xFF, 0x0A, 0x7F]);
    }
}
