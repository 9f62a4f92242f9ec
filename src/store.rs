// SHARDBENCH RESULT STORE
// APPEND-ONLY JSON LINES. THE FILE IS OPENED, APPENDED AND SYNCED ON EVERY
// WRITE SO A CRASH MID-EXPERIMENT LOSES AT MOST THE RUN IN FLIGHT.

use std::fs::OpenOptions;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BenchError, Result};
use crate::record::BenchmarkRecord;

pub trait RecordSink {
    fn append(&mut self, record: &BenchmarkRecord) -> Result<()>;
}

impl RecordSink for Vec<BenchmarkRecord> {
    fn append(&mut self, record: &BenchmarkRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

pub struct JsonLines<T> {
    path: PathBuf,
    _record: PhantomData<fn(T)>,
}

impl<T: Serialize + DeserializeOwned> JsonLines<T> {
    // CREATES THE PARENT DIRECTORY AND THE FILE. FAILURE HERE IS FATAL FOR
    // THE CALLER: THERE IS NOWHERE TO PUT RESULTS.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| BenchError::io("creating output directory", dir, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BenchError::io("opening", &path, e))?;
        Ok(Self {
            path,
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| BenchError::Record { line: 0, source: e })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| BenchError::io("opening", &self.path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| BenchError::io("appending to", &self.path, e))
    }

    pub fn read_all(&self) -> Result<Vec<T>> {
        read_json_lines(&self.path)
    }
}

pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = std::fs::read_to_string(path).map_err(|e| BenchError::io("reading", path, e))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| BenchError::Record {
                line: i + 1,
                source: e,
            })
        })
        .collect()
}

pub type ResultStore = JsonLines<BenchmarkRecord>;

impl RecordSink for ResultStore {
    fn append(&mut self, record: &BenchmarkRecord) -> Result<()> {
        self.write(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Measurement, UNLIMITED_RATE};

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/raw.jsons");
        let store = ResultStore::create(&path).unwrap();
        assert!(path.exists());
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn reports_malformed_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.jsons");
        std::fs::write(&path, "\n{\"nope\": 1}\n").unwrap();
        match read_json_lines::<BenchmarkRecord>(&path) {
            Err(BenchError::Record { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected record error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn vec_sink_keeps_order() {
        let mut sink: Vec<BenchmarkRecord> = Vec::new();
        for t in [1, 2, 3] {
            RecordSink::append(&mut sink, &BenchmarkRecord::new("memkv", t, UNLIMITED_RATE, &Measurement::NoReport))
                .unwrap();
        }
        let threads: Vec<u32> = sink.iter().map(|r| r.num_threads).collect();
        assert_eq!(threads, vec![1, 2, 3]);
    }
}
