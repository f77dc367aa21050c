use std::fs::{File, Metadata};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading the tailed file
#[derive(Error, Debug)]
pub enum TailError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lifecycle of the tailed file handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// No handle yet, or the handle was released after an I/O error
    Closed,
    Open,
    /// The path did not exist on the last open attempt
    AwaitingCreation,
}

/// Where the first successful open starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    #[default]
    Beginning,
    /// Skip whatever the file already holds
    End,
    Offset(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity_of(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity_of(_meta: &Metadata) -> Option<FileIdentity> {
    None
}

/// Tails a growing log file by byte offset
///
/// The reader owns the only handle to the watched file. Each call to
/// [`TailReader::poll_new_lines`] returns the complete lines appended since
/// the previous call. A trailing line without its newline is left in place
/// and offered again once it is finished.
///
/// Rotation is detected when the file shrinks below the tracked offset
/// (truncation in place) or, on Unix, when the path starts naming a
/// different inode (rename and recreate). Either way reading restarts at
/// offset 0 of the new file.
pub struct TailReader {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    identity: Option<FileIdentity>,
    last_position: u64,
    start: Option<StartPosition>,
    state: TailState,
}

impl TailReader {
    /// Create a reader that starts at the beginning of the file
    pub fn new(path: PathBuf) -> Self {
        Self::with_start(path, StartPosition::Beginning)
    }

    /// Create a reader whose first open starts at `start`
    ///
    /// The start position only applies if the file exists on the first
    /// open attempt. Files created later, and files seen after a rotation,
    /// are always read from offset 0.
    pub fn with_start(path: PathBuf, start: StartPosition) -> Self {
        TailReader {
            path,
            reader: None,
            identity: None,
            last_position: 0,
            start: Some(start),
            state: TailState::Closed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    /// Byte offset of the first byte not yet returned as part of a line
    pub fn position(&self) -> u64 {
        self.last_position
    }

    /// Try to open the file if no handle is held
    ///
    /// A missing file is not an error: the reader moves to
    /// [`TailState::AwaitingCreation`] and the next poll tries again.
    pub fn open(&mut self) -> Result<TailState, TailError> {
        if self.reader.is_some() {
            return Ok(self.state);
        }

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.state != TailState::AwaitingCreation {
                    log::info!(
                        "Log file {} not found, waiting for creation...",
                        self.path.display()
                    );
                }
                // A file that shows up later is read in full.
                self.start = Some(StartPosition::Beginning);
                self.last_position = 0;
                self.state = TailState::AwaitingCreation;
                return Ok(self.state);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let meta = file.metadata().map_err(|e| self.io_error(e))?;
        let identity = identity_of(&meta);

        let position = match self.start.take() {
            Some(StartPosition::Beginning) => 0,
            Some(StartPosition::End) => meta.len(),
            Some(StartPosition::Offset(offset)) => offset.min(meta.len()),
            // Reopening after an I/O error resumes where we left off unless
            // the path now names a different file.
            None if self.identity.is_some() && self.identity != identity => 0,
            None => self.last_position,
        };

        self.last_position = if position > meta.len() { 0 } else { position };
        self.identity = identity;
        self.reader = Some(BufReader::new(file));
        self.state = TailState::Open;
        log::info!(
            "Opened log file: {} at offset {}",
            self.path.display(),
            self.last_position
        );
        Ok(self.state)
    }

    /// Return the complete lines appended since the last call
    ///
    /// Lines are returned without their line terminator. On an I/O error
    /// the offset is left untouched and the handle is released, so the next
    /// call reopens the file and resumes from the same offset.
    pub fn poll_new_lines(&mut self) -> Result<Vec<String>, TailError> {
        match self.poll_inner() {
            Ok(lines) => Ok(lines),
            Err(e) => {
                self.reader = None;
                if self.state == TailState::Open {
                    self.state = TailState::Closed;
                }
                Err(e)
            }
        }
    }

    fn poll_inner(&mut self) -> Result<Vec<String>, TailError> {
        if self.reader.is_none() && self.open()? != TailState::Open {
            return Ok(Vec::new());
        }

        let path_meta = match std::fs::metadata(&self.path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(self.io_error(e)),
        };

        let Some(path_meta) = path_meta else {
            // Deleted: whatever was finished in the old file is still ours.
            let lines = self.read_available()?;
            log::info!(
                "Log file {} deleted, waiting for it to be recreated",
                self.path.display()
            );
            self.release();
            self.state = TailState::AwaitingCreation;
            return Ok(lines);
        };

        let path_identity = identity_of(&path_meta);
        if path_identity.is_some() && path_identity != self.identity {
            let mut lines = self.read_available()?;
            log::info!("Log file {} rotated, reopening...", self.path.display());
            self.release();
            // The old file's lines are already consumed; a failure on the new
            // file is retried on the next poll from offset 0.
            match self.open() {
                Ok(TailState::Open) => match self.read_available() {
                    Ok(more) => lines.extend(more),
                    Err(e) => log::warn!("Error reading rotated log file: {}", e),
                },
                Ok(_) => {}
                Err(e) => log::warn!("Error reopening rotated log file: {}", e),
            }
            return Ok(lines);
        }

        let handle_len = self.handle_len()?;
        if handle_len < self.last_position {
            log::info!(
                "Log file {} truncated ({} < {}), reading from the start",
                self.path.display(),
                handle_len,
                self.last_position
            );
            self.release();
            if self.open()? != TailState::Open {
                return Ok(Vec::new());
            }
        }

        self.read_available()
    }

    /// Read every complete line between the tracked offset and EOF
    fn read_available(&mut self) -> Result<Vec<String>, TailError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let result = read_complete_lines(reader, &mut self.last_position);
        result.map_err(|e| self.io_error(e))
    }

    fn handle_len(&self) -> Result<u64, TailError> {
        match self.reader.as_ref() {
            Some(reader) => reader
                .get_ref()
                .metadata()
                .map(|meta| meta.len())
                .map_err(|e| self.io_error(e)),
            None => Ok(0),
        }
    }

    /// Drop the handle so the next open starts at offset 0
    fn release(&mut self) {
        self.reader = None;
        self.identity = None;
        self.last_position = 0;
        self.start = Some(StartPosition::Beginning);
        self.state = TailState::Closed;
    }

    fn io_error(&self, source: io::Error) -> TailError {
        TailError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Read complete lines starting at `position`
///
/// `position` only moves once every line up to EOF has been read, so a
/// failed read hands the same lines out again on the next attempt.
fn read_complete_lines<R: BufRead + Seek>(reader: &mut R, position: &mut u64) -> io::Result<Vec<String>> {
    reader.seek(SeekFrom::Start(*position))?;

    let mut offset = *position;
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes_read = reader.read_until(b'\n', &mut buf)?;
        if bytes_read == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        offset += bytes_read as u64;
        lines.push(decode_line(&buf));
    }

    *position = offset;
    Ok(lines)
}

fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    while end > 0 && (buf[end - 1] == b'\n' || buf[end - 1] == b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::{Cursor, Read, Write};
    use tempfile::TempDir;

    /// In-memory file whose reads fail once they reach `fail_at`
    struct FlakyFile {
        data: Cursor<Vec<u8>>,
        fail_at: u64,
    }

    impl Read for FlakyFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let pos = self.data.position();
            if pos >= self.fail_at {
                return Err(io::Error::new(io::ErrorKind::Other, "device error"));
            }
            let limit = buf.len().min((self.fail_at - pos) as usize);
            self.data.read(&mut buf[..limit])
        }
    }

    impl Seek for FlakyFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.data.seek(pos)
        }
    }

    fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_reads_complete_lines_and_advances_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "first\nsecond\n");

        let mut tailer = TailReader::new(path.clone());
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["first", "second"]);
        assert_eq!(tailer.position(), 13);
        assert_eq!(tailer.state(), TailState::Open);

        assert!(tailer.poll_new_lines().unwrap().is_empty());

        append(&path, "third\n");
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["third"]);
        assert_eq!(tailer.position(), 19);
    }

    #[test]
    fn test_partial_line_is_offered_again_once_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "done\nhalf");

        let mut tailer = TailReader::new(path.clone());
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["done"]);
        assert_eq!(tailer.position(), 5);

        append(&path, " and the rest\n");
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["half and the rest"]);
        assert_eq!(tailer.position(), 23);
    }

    #[test]
    fn test_start_offset_reads_from_that_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        let contents = "aaa\nbb\n\nc\r\ntail";
        append(&path, contents);

        for p in [0u64, 4, 7, 8] {
            let mut tailer = TailReader::with_start(path.clone(), StartPosition::Offset(p));
            let lines = tailer.poll_new_lines().unwrap();

            let expected: Vec<String> = contents[p as usize..]
                .split_inclusive('\n')
                .filter(|l| l.ends_with('\n'))
                .map(|l| l.trim_end_matches(|c| c == '\n' || c == '\r').to_string())
                .collect();
            assert_eq!(lines, expected, "offset {}", p);
            assert_eq!(tailer.position(), 11);
        }
    }

    #[test]
    fn test_start_at_end_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "old line\n");

        let mut tailer = TailReader::with_start(path.clone(), StartPosition::End);
        assert!(tailer.poll_new_lines().unwrap().is_empty());

        append(&path, "new line\n");
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["new line"]);
    }

    #[test]
    fn test_missing_file_waits_for_creation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");

        let mut tailer = TailReader::with_start(path.clone(), StartPosition::End);
        assert!(tailer.poll_new_lines().unwrap().is_empty());
        assert_eq!(tailer.state(), TailState::AwaitingCreation);

        append(&path, "created\n");
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["created"]);
        assert_eq!(tailer.state(), TailState::Open);
    }

    #[test]
    fn test_truncation_resets_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "a fairly long line that was here before\n");

        let mut tailer = TailReader::new(path.clone());
        assert_eq!(tailer.poll_new_lines().unwrap().len(), 1);

        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        append(&path, "fresh\n");

        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["fresh"]);
        assert_eq!(tailer.position(), 6);
    }

    #[test]
    fn test_deleted_file_waits_then_reads_recreated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "one\n");

        let mut tailer = TailReader::new(path.clone());
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["one"]);

        std::fs::remove_file(&path).unwrap();
        assert!(tailer.poll_new_lines().unwrap().is_empty());
        assert_eq!(tailer.state(), TailState::AwaitingCreation);
        assert_eq!(tailer.position(), 0);

        append(&path, "two\n");
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["two"]);
    }

    #[test]
    fn test_read_error_keeps_offset_and_lines() {
        let mut reader = BufReader::new(FlakyFile {
            data: Cursor::new(b"one\ntwo\n".to_vec()),
            fail_at: 6,
        });
        let mut position = 0;

        assert!(read_complete_lines(&mut reader, &mut position).is_err());
        assert_eq!(position, 0);

        reader.get_mut().fail_at = u64::MAX;
        assert_eq!(
            read_complete_lines(&mut reader, &mut position).unwrap(),
            vec!["one", "two"]
        );
        assert_eq!(position, 8);
    }

    #[cfg(unix)]
    #[test]
    fn test_rename_rotation_drains_old_file_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "before\n");

        let mut tailer = TailReader::new(path.clone());
        assert_eq!(tailer.poll_new_lines().unwrap(), vec!["before"]);

        append(&path, "late write\n");
        std::fs::rename(&path, dir.path().join("auth.log.1")).unwrap();
        append(&path, "a line in the new file that is longer\n");

        assert_eq!(
            tailer.poll_new_lines().unwrap(),
            vec!["late write", "a line in the new file that is longer"]
        );
        assert_eq!(tailer.position(), 38);
    }
}
