//! Input and output plumbing: (gzipped) text files, the `samtools view` child process and the
//! fragment output sink.

use std::fs::File as StdFile;
use std::io::{self as stdio, BufRead, BufReader as StdBufReader};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use flate2::read::MultiGzDecoder;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{self, AsyncRead, AsyncWrite, BufReader, BufWriter},
    process::{Child, ChildStdout, Command},
};

const GZ_BUF_SIZE: usize = 1 << 22;
const TEXT_BUF_SIZE: usize = 256 * 1024;

/// Path argument that selects stdin or stdout instead of a file
pub const STD_STREAM: &str = "-";

fn is_std_stream(path: &Path) -> bool {
    path.as_os_str() == STD_STREAM
}

/// Open a plain or gzip compressed (`.gz`) text file for buffered line reading.
pub fn open_text<P: AsRef<Path>>(path: P) -> stdio::Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = StdFile::open(path)?;

    let gzipped = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if gzipped {
        Ok(Box::new(StdBufReader::with_capacity(
            GZ_BUF_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(StdBufReader::with_capacity(TEXT_BUF_SIZE, file)))
    }
}

/// Open a file holding `samtools view` output, `-` reads from stdin.
pub async fn open_alignment_text(path: &Path) -> io::Result<BufReader<Box<dyn AsyncRead + Unpin>>> {
    let read: Box<dyn AsyncRead + Unpin> = if is_std_stream(path) {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path).await?)
    };
    Ok(BufReader::with_capacity(TEXT_BUF_SIZE, read))
}

/// Create the fragment output, `-` writes to stdout.
pub async fn create_output(path: &Path) -> io::Result<BufWriter<Box<dyn AsyncWrite + Unpin>>> {
    let write: Box<dyn AsyncWrite + Unpin> = if is_std_stream(path) {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(path).await?)
    };
    Ok(BufWriter::with_capacity(TEXT_BUF_SIZE, write))
}

/// A running `samtools view` dumping a BAM file as SAM text to its stdout.
pub struct AlignmentDump {
    program: PathBuf,
    child: Child,
}

impl AlignmentDump {
    /// Start `<samtools> view <bam>`. The child is killed when the dump is dropped before it was
    /// waited on.
    pub fn spawn(samtools: &Path, bam: &Path) -> Result<(AlignmentDump, BufReader<ChildStdout>), BamIoError> {
        let mut child = Command::new(samtools)
            .arg("view")
            .arg(bam)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BamIoError::Spawn { program: samtools.to_owned(), source })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BamIoError::Spawn {
                program: samtools.to_owned(),
                source: stdio::Error::new(stdio::ErrorKind::BrokenPipe, "no stdout handle"),
            })?;

        let dump = AlignmentDump { program: samtools.to_owned(), child };
        Ok((dump, BufReader::with_capacity(TEXT_BUF_SIZE, stdout)))
    }

    /// Wait for the child to exit, a non-zero exit status is an error.
    pub async fn wait(mut self) -> Result<(), BamIoError> {
        let status = self.child.wait().await.map_err(|source| BamIoError::Wait {
            program: self.program.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(BamIoError::Exit { program: self.program, status })
        }
    }
}

#[derive(Debug, Error)]
pub enum BamIoError {
    #[error("waiting for {program}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to run {program}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit { program: PathBuf, status: ExitStatus },
}
