use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::PathBuf;

use crate::config::DataConfig;
use crate::error::{CorpusError, Result};
use crate::pair::{CompilerFamily, ErrorExplanationPair};

/// A non-blank line, or the reason it could not be decoded.
type RawLine = std::result::Result<String, String>;

/// Lazily pairs up non-blank lines of one source: error, explanation, error, ...
///
/// A trailing unpaired line is dropped with a warning. A line that is not valid
/// UTF-8 still takes its slot, so the pair it belongs to comes back as
/// `DataFormat` and the lines after it keep their alternation.
pub struct PairReader<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
    source_name: String,
    compiler: CompilerFamily,
    line_no: usize,
    pending: Option<(usize, RawLine)>,
}

impl<R: BufRead> PairReader<R> {
    pub fn new(reader: R, source_name: impl Into<String>, compiler: CompilerFamily) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            source_name: source_name.into(),
            compiler,
            line_no: 0,
            pending: None,
        }
    }

    /// Next line without its terminator; `None` at end of input.
    fn next_line(&mut self) -> Option<std::io::Result<RawLine>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                let line = String::from_utf8(std::mem::take(&mut self.buf))
                    .map_err(|e| format!("line is not valid UTF-8: {}", e.utf8_error()));
                Some(Ok(line))
            }
            Err(e) => Some(Err(e)),
        }
    }

    fn data_format(&self, line: usize, reason: impl Into<String>) -> CorpusError {
        CorpusError::DataFormat {
            source_name: self.source_name.clone(),
            line,
            reason: reason.into(),
        }
    }
}

impl<R: BufRead> Iterator for PairReader<R> {
    type Item = Result<ErrorExplanationPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(CorpusError::io(&self.source_name, e))),
                None => {
                    if let Some((line, _)) = self.pending.take() {
                        tracing::warn!(
                            source = %self.source_name,
                            line,
                            "dropping unpaired trailing line"
                        );
                    }
                    return None;
                }
            };
            self.line_no += 1;

            if matches!(&line, Ok(text) if text.trim().is_empty()) {
                continue;
            }

            match self.pending.take() {
                None => self.pending = Some((self.line_no, line)),
                Some((error_line, error_text)) => {
                    let pair = match (error_text, line) {
                        (Ok(error_text), Ok(explanation)) => {
                            ErrorExplanationPair::new(error_text, explanation, self.compiler)
                                .map_err(|reason| self.data_format(error_line, reason))
                        }
                        (Err(reason), _) => Err(self.data_format(error_line, reason)),
                        (Ok(_), Err(reason)) => Err(self.data_format(self.line_no, reason)),
                    };
                    return Some(pair);
                }
            }
        }
    }
}

/// Reads pairs from a list of raw files, in order.
#[derive(Debug, Clone)]
pub struct RawCorpusReader {
    paths: Vec<PathBuf>,
}

impl RawCorpusReader {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(config.raw_paths())
    }

    /// Lazy sequence over every file. Missing files are skipped.
    pub fn pairs(&self) -> impl Iterator<Item = Result<ErrorExplanationPair>> + '_ {
        self.paths
            .iter()
            .flat_map(|path| -> Box<dyn Iterator<Item = Result<ErrorExplanationPair>>> {
                match File::open(path) {
                    Ok(file) => {
                        tracing::info!(path = %path.display(), "loading raw pairs");
                        Box::new(PairReader::new(
                            BufReader::new(file),
                            path.display().to_string(),
                            CompilerFamily::from_path(path),
                        ))
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        tracing::info!(path = %path.display(), "raw file not found, skipping");
                        Box::new(std::iter::empty())
                    }
                    Err(e) => Box::new(std::iter::once(Err(CorpusError::io(path, e)))),
                }
            })
    }

    /// Collects all pairs. Malformed records are skipped with a warning; I/O errors abort.
    pub fn read_all(&self) -> Result<Vec<ErrorExplanationPair>> {
        let mut pairs = Vec::new();
        for item in self.pairs() {
            match item {
                Ok(pair) => pairs.push(pair),
                Err(e @ CorpusError::DataFormat { .. }) => tracing::warn!("skipping record: {}", e),
                Err(e) => return Err(e),
            }
        }
        tracing::info!(count = pairs.len(), "loaded error-explanation pairs");
        Ok(pairs)
    }
}
