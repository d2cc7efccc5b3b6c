//! Writer side of the remote copy sink protocol
//!
//! The remote end runs `scp -t` and expects a stream of directives on stdin:
//!
//! - `C<mode> <size> <name>\n`, then `size` bytes of content, then a single `0x00`
//! - `D<mode> 0 <name>\n` to enter a directory
//! - `E\n` to leave it
//!
//! Acknowledgements sent back by the sink are never parsed.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::error::ExecError;

/// Directive closing the current directory
pub const END_DIR: &[u8] = b"E\n";

/// Header announcing a file of `size` bytes
#[must_use]
pub fn file_header(mode: u32, size: u64, name: &str) -> String {
    format!("C{:04o} {} {}\n", mode & 0o777, size, name)
}

/// Header entering a directory
#[must_use]
pub fn dir_header(mode: u32, name: &str) -> String {
    format!("D{:04o} 0 {}\n", mode & 0o777, name)
}

enum Step {
    Dir(PathBuf),
    File(PathBuf),
    Leave,
}

/// Streams files and directory trees as sink directives
pub struct SinkWriter<W> {
    writer: W,
    verbose: bool,
}

impl<W: AsyncWrite + Unpin> SinkWriter<W> {
    /// Wrap the stream feeding the remote sink's stdin
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            verbose: false,
        }
    }

    /// Echo local errors to stderr before returning them
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Send one regular file
    ///
    /// # Errors
    /// Returns `ExecError` if the file cannot be read in full or the stream rejects a write
    pub async fn send_file(&mut self, path: &Path, metadata: &Metadata) -> Result<(), ExecError> {
        let name = base_name(path)?;
        let size = metadata.len();

        let file = File::open(path).await.map_err(|e| {
            self.report(ExecError::io(
                format!("could not open source file {}", path.display()),
                e,
            ))
        })?;

        self.write(file_header(mode_of(metadata), size, &name).as_bytes(), "could not write scp header")
            .await?;

        let sent = tokio::io::copy(&mut file.take(size), &mut self.writer)
            .await
            .map_err(|e| self.report(ExecError::io("could not send file", e)))?;
        if sent != size {
            return Err(self.report(ExecError::ShortRead {
                path: path.display().to_string(),
                expected: size,
                actual: sent,
            }));
        }

        self.write(&[0], "could not send the last byte").await?;
        debug!(path = %path.display(), size, "sent file");
        Ok(())
    }

    /// Enter a directory
    ///
    /// # Errors
    /// Returns `ExecError` if the stream rejects the write
    pub async fn enter_dir(&mut self, path: &Path, metadata: &Metadata) -> Result<(), ExecError> {
        let name = base_name(path)?;
        self.write(dir_header(mode_of(metadata), &name).as_bytes(), "could not write directory header")
            .await?;
        debug!(path = %path.display(), "entered directory");
        Ok(())
    }

    /// Leave the current directory
    ///
    /// # Errors
    /// Returns `ExecError` if the stream rejects the write
    pub async fn exit_dir(&mut self) -> Result<(), ExecError> {
        self.write(END_DIR, "could not write directory end").await
    }

    /// Send a directory and everything below it, depth first
    ///
    /// Children follow the order the directory listing returns them in. Symbolic links
    /// below `root` are skipped, never followed.
    ///
    /// # Errors
    /// Returns the first `ExecError`; nothing after it is sent
    pub async fn send_tree(&mut self, root: &Path) -> Result<(), ExecError> {
        let mut stack = vec![Step::Dir(root.to_path_buf())];

        while let Some(step) = stack.pop() {
            match step {
                Step::Leave => self.exit_dir().await?,
                Step::File(path) => {
                    let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
                        self.report(ExecError::io(format!("could not stat {}", path.display()), e))
                    })?;
                    self.send_file(&path, &metadata).await?;
                }
                Step::Dir(dir) => {
                    let metadata = tokio::fs::metadata(&dir).await.map_err(|e| {
                        self.report(ExecError::io(format!("could not stat {}", dir.display()), e))
                    })?;
                    self.enter_dir(&dir, &metadata).await?;

                    let children = self.list_dir(&dir).await?;
                    stack.push(Step::Leave);
                    stack.extend(children.into_iter().rev());
                }
            }
        }

        Ok(())
    }

    /// Flush and close the stream, signalling end of input to the sink
    ///
    /// # Errors
    /// Returns `ExecError` if the final flush fails
    pub async fn finish(mut self) -> Result<W, ExecError> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| self.report(ExecError::io("could not close copy stream", e)))?;
        Ok(self.writer)
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<Step>, ExecError> {
        let read_err =
            |e| self.report(ExecError::io(format!("could not read directory {}", dir.display()), e));

        let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
        let mut children = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let file_type = entry.file_type().await.map_err(read_err)?;
            let path = entry.path();

            if file_type.is_symlink() {
                warn!(path = %path.display(), "skipping symbolic link");
            } else if file_type.is_dir() {
                children.push(Step::Dir(path));
            } else if file_type.is_file() {
                children.push(Step::File(path));
            } else {
                warn!(path = %path.display(), "skipping special file");
            }
        }

        Ok(children)
    }

    async fn write(&mut self, bytes: &[u8], context: &str) -> Result<(), ExecError> {
        if let Err(e) = self.writer.write_all(bytes).await {
            return Err(self.report(ExecError::io(context, e)));
        }
        Ok(())
    }

    fn report(&self, err: ExecError) -> ExecError {
        if self.verbose {
            eprintln!("{err}");
            error!(error = %err, "copy failed");
        }
        err
    }
}

pub(crate) fn base_name(path: &Path) -> Result<String, ExecError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ExecError::InvalidPath(format!("{} has no file name", path.display())))
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata) -> u32 {
    if metadata.is_dir() || !metadata.permissions().readonly() {
        0o755
    } else {
        0o444
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// Split a sink stream back into directive lines, checking file payload framing
    fn directives(stream: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        let mut pos = 0;

        while pos < stream.len() {
            let end = pos + stream[pos..].iter().position(|&b| b == b'\n').unwrap();
            let line = String::from_utf8(stream[pos..end].to_vec()).unwrap();
            pos = end + 1;

            if line.starts_with('C') {
                let size: usize = line.split(' ').nth(1).unwrap().parse().unwrap();
                pos += size;
                assert_eq!(stream[pos], 0, "file payload must end with a NUL byte");
                pos += 1;
            }
            out.push(line);
        }

        out
    }

    fn set_mode(path: &Path, mode: u32) {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_headers() {
        assert_eq!(file_header(0o100644, 12, "notes.txt"), "C0644 12 notes.txt\n");
        assert_eq!(dir_header(0o40755, "etc"), "D0755 0 etc\n");
        assert_eq!(file_header(0o600, 0, "empty"), "C0600 0 empty\n");
    }

    #[tokio::test]
    async fn test_send_file_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        std::fs::write(&path, b"hello world").unwrap();
        set_mode(&path, 0o644);
        let metadata = std::fs::metadata(&path).unwrap();

        let mut sink = SinkWriter::new(Vec::new());
        sink.send_file(&path, &metadata).await.unwrap();
        let stream = sink.finish().await.unwrap();

        let mut expected = b"C0644 11 motd\n".to_vec();
        expected.extend_from_slice(b"hello world");
        expected.push(0);
        assert_eq!(stream, expected);
    }

    #[tokio::test]
    async fn test_send_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        set_mode(&path, 0o600);
        let metadata = std::fs::metadata(&path).unwrap();

        let mut sink = SinkWriter::new(Vec::new());
        sink.send_file(&path, &metadata).await.unwrap();

        assert_eq!(sink.finish().await.unwrap(), b"C0600 0 empty\n\0".to_vec());
    }

    #[tokio::test]
    async fn test_send_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("present");
        std::fs::write(&path, b"x").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let mut sink = SinkWriter::new(Vec::new()).verbose(true);
        let err = sink.send_file(&path, &metadata).await.unwrap_err();

        assert!(matches!(err, ExecError::Io { .. }));
        assert!(sink.finish().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tree_with_file_and_empty_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(root.join("cache")).unwrap();
        std::fs::write(root.join("index.html"), b"<html></html>").unwrap();
        set_mode(&root, 0o755);
        set_mode(&root.join("cache"), 0o700);
        set_mode(&root.join("index.html"), 0o644);

        let mut sink = SinkWriter::new(Vec::new());
        sink.send_tree(&root).await.unwrap();
        let lines = directives(&sink.finish().await.unwrap());

        assert_eq!(lines.len(), 5);
        assert_eq!(lines.first().unwrap(), "D0755 0 site");
        assert_eq!(lines.last().unwrap(), "E");

        let subdir = lines.iter().position(|l| l == "D0700 0 cache").unwrap();
        assert_eq!(lines[subdir + 1], "E");
        assert!(lines.contains(&"C0644 13 index.html".to_string()));
    }

    #[tokio::test]
    async fn test_tree_nesting_is_balanced() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a");
        std::fs::create_dir_all(root.join("b/c/d")).unwrap();
        std::fs::create_dir_all(root.join("e")).unwrap();
        std::fs::write(root.join("b/one"), b"1").unwrap();
        std::fs::write(root.join("b/c/two"), b"22").unwrap();
        std::fs::write(root.join("b/c/d/three"), b"333").unwrap();
        std::fs::write(root.join("e/four"), b"4444").unwrap();

        let mut sink = SinkWriter::new(Vec::new());
        sink.send_tree(&root).await.unwrap();
        let lines = directives(&sink.finish().await.unwrap());

        let mut depth = 0i32;
        let mut files = 0;
        for line in &lines {
            match &line[..1] {
                "D" => depth += 1,
                "E" => depth -= 1,
                "C" => {
                    assert!(depth > 0, "file sent outside any directory");
                    files += 1;
                }
                other => panic!("unexpected directive {other}"),
            }
            assert!(depth >= 0);
        }
        assert_eq!(depth, 0);
        assert_eq!(files, 4);
        assert_eq!(lines.iter().filter(|l| l.starts_with('D')).count(), 5);
    }

    #[tokio::test]
    async fn test_tree_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("conf");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("real"), b"data").unwrap();
        std::os::unix::fs::symlink(&root, root.join("loop")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

        let mut sink = SinkWriter::new(Vec::new());
        sink.send_tree(&root).await.unwrap();
        let lines = directives(&sink.finish().await.unwrap());

        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(" 4 real"));
    }
}
