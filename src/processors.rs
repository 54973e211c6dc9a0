use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::processor::{Emitter, KillSwitch, Payload, Processor};
use parking_lot::Mutex;
use regex::bytes::Regex;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Reads the entire contents of a file and emits them as one payload.
///
/// Intended as a root processor: the triggering payload (normally the
/// start signal) is ignored.
pub struct FileReader {
    path: PathBuf,
}

impl FileReader {
    /// Create a reader for the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Processor for FileReader {
    fn process_data(&self, _data: Payload, out: &Emitter, kill: &KillSwitch, _cancel: &CancelToken) {
        if let Some(contents) = kill.kill_on_err(fs::read(&self.path)) {
            out.emit(contents);
        }
    }

    fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

    fn name(&self) -> &str {
        "FileReader"
    }
}

/// Writes every payload to the wrapped writer.
///
/// Works with files, standard output, or anything else implementing
/// `Write`. The writer is flushed when the input link drains.
pub struct IoWriter<W: Write + Send + 'static> {
    writer: Mutex<W>,
    add_newline: bool,
}

impl<W: Write + Send + 'static> IoWriter<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            add_newline: false,
        }
    }

    /// Append a newline after each payload
    pub fn with_newline(mut self, enabled: bool) -> Self {
        self.add_newline = enabled;
        self
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send + 'static> Processor for IoWriter<W> {
    fn process_data(&self, data: Payload, _out: &Emitter, kill: &KillSwitch, _cancel: &CancelToken) {
        let mut writer = self.writer.lock();
        let result = writer.write_all(&data).and_then(|_| {
            if self.add_newline {
                writer.write_all(b"\n")
            } else {
                Ok(())
            }
        });
        if kill.kill_on_err(result).is_some() {
            tracing::debug!(bytes = data.len(), "wrote payload");
        }
    }

    fn finish(&self, _out: &Emitter, kill: &KillSwitch, _cancel: &CancelToken) {
        kill.kill_on_err(self.writer.lock().flush());
    }

    fn name(&self) -> &str {
        "IoWriter"
    }
}

/// Forwards payloads that match the given pattern and drops the rest.
pub struct RegexpMatcher {
    pattern: Regex,
    debug_log: bool,
}

impl RegexpMatcher {
    /// Compile the pattern; invalid patterns are a configuration error
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            pattern,
            debug_log: false,
        })
    }

    /// Log every match attempt at debug level
    pub fn with_debug_log(mut self, enabled: bool) -> Self {
        self.debug_log = enabled;
        self
    }
}

impl Processor for RegexpMatcher {
    fn process_data(&self, data: Payload, out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {
        let matches = self.pattern.is_match(&data);
        if self.debug_log {
            tracing::debug!(
                pattern = %self.pattern,
                data = %String::from_utf8_lossy(&data),
                matches,
                "match attempt"
            );
        }
        if matches {
            out.emit(data);
        }
    }

    fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

    fn name(&self) -> &str {
        "RegexpMatcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NodeStats;
    use crossbeam::channel::bounded;
    use std::sync::Arc;

    fn harness() -> (Emitter, KillSwitch, CancelToken, crossbeam::channel::Receiver<Payload>) {
        let cancel = CancelToken::new();
        let (out_tx, out_rx) = bounded(16);
        let (kill_tx, _kill_rx) = bounded(1);
        let emitter = Emitter::new(Some(out_tx), Arc::new(NodeStats::new()), cancel.clone());
        let kill = KillSwitch::new(kill_tx, cancel.clone());
        (emitter, kill, cancel, out_rx)
    }

    #[test]
    fn test_regexp_matcher_filters() {
        let (out, kill, cancel, rx) = harness();
        let matcher = RegexpMatcher::new("ERROR").unwrap();

        matcher.process_data(b"ERROR: disk full".to_vec(), &out, &kill, &cancel);
        matcher.process_data(b"INFO: all good".to_vec(), &out, &kill, &cancel);
        drop(out);

        let forwarded: Vec<Payload> = rx.iter().collect();
        assert_eq!(forwarded, vec![b"ERROR: disk full".to_vec()]);
    }

    #[test]
    fn test_regexp_matcher_rejects_bad_pattern() {
        assert!(matches!(
            RegexpMatcher::new("(unclosed").err(),
            Some(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_io_writer_writes_with_newline() {
        let (out, kill, cancel, _rx) = harness();
        let writer = IoWriter::new(Vec::new()).with_newline(true);

        writer.process_data(b"one".to_vec(), &out, &kill, &cancel);
        writer.process_data(b"two".to_vec(), &out, &kill, &cancel);
        writer.finish(&out, &kill, &cancel);

        assert_eq!(writer.into_inner(), b"one\ntwo\n".to_vec());
    }

    #[test]
    fn test_file_reader_emits_contents() {
        let path = std::env::temp_dir().join("sluice_file_reader_test.txt");
        fs::write(&path, b"payload bytes").unwrap();

        let (out, kill, cancel, rx) = harness();
        let reader = FileReader::new(&path);
        reader.process_data(b"GO".to_vec(), &out, &kill, &cancel);
        drop(out);

        assert_eq!(rx.recv().unwrap(), b"payload bytes".to_vec());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_file_reader_kills_on_missing_file() {
        let cancel = CancelToken::new();
        let (out_tx, _out_rx) = bounded(4);
        let (kill_tx, kill_rx) = bounded(1);
        let out = Emitter::new(Some(out_tx), Arc::new(NodeStats::new()), cancel.clone());
        let kill = KillSwitch::new(kill_tx, cancel.clone());

        let reader = FileReader::new("/definitely/not/a/real/path");
        reader.process_data(b"GO".to_vec(), &out, &kill, &cancel);

        assert!(matches!(kill_rx.try_recv(), Ok(PipelineError::Io(_))));
    }
}
