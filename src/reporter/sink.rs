use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;

/// Where the report goes: a freshly created file or the standard output.
///
/// A file sink is closed when the sink is dropped, call [`ReportSink::finish`] to observe write
/// errors before that.
pub enum ReportSink {
    Stdout(Stdout),
    File(BufWriter<File>),
}

impl ReportSink {
    /// Create or truncate `path`, or fall back to stdout when there is no path
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            Some(path) => Ok(ReportSink::File(BufWriter::new(File::create(path)?))),
            None => Ok(ReportSink::Stdout(io::stdout())),
        }
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.flush()?;
        if let ReportSink::File(writer) = self {
            writer.into_inner().map_err(|err| err.into_error())?;
        }
        Ok(())
    }
}

impl Write for ReportSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ReportSink::Stdout(stdout) => stdout.write(buf),
            ReportSink::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ReportSink::Stdout(stdout) => stdout.flush(),
            ReportSink::File(file) => file.flush(),
        }
    }
}
