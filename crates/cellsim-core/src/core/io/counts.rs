use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CountsError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV writing error: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
}

/// Observable values at one sampling point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountSample {
    pub iteration: u64,
    /// Simulation time in seconds.
    pub time: f64,
    pub values: Vec<u64>,
}

/// Writes samples as CSV rows: `iteration,time,<observable...>`.
pub struct CountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl CountWriter<File> {
    pub fn create(path: &Path, names: &[String]) -> Result<Self, CountsError> {
        let file = File::create(path).map_err(|e| CountsError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_writer(file, names)
    }
}

impl<W: Write> CountWriter<W> {
    pub fn from_writer(inner: W, names: &[String]) -> Result<Self, CountsError> {
        let mut writer = csv::Writer::from_writer(inner);
        let mut header = vec!["iteration".to_string(), "time".to_string()];
        header.extend(names.iter().cloned());
        writer.write_record(&header)?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, sample: &CountSample) -> Result<(), CountsError> {
        let mut record = Vec::with_capacity(sample.values.len() + 2);
        record.push(sample.iteration.to_string());
        record.push(format!("{:e}", sample.time));
        record.extend(sample.values.iter().map(u64::to_string));
        self.writer.write_record(&record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CountsError> {
        self.writer.flush().map_err(|e| CountsError::Csv { source: e.into() })
    }

    pub fn into_inner(self) -> Result<W, CountsError> {
        self.writer
            .into_inner()
            .map_err(|e| CountsError::Csv { source: e.into_error().into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let mut writer = CountWriter::from_writer(Vec::new(), &["A".into(), "B_in_cell".into()]).unwrap();
        writer
            .write(&CountSample {
                iteration: 10,
                time: 1e-5,
                values: vec![3, 0],
            })
            .unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("iteration,time,A,B_in_cell"));
        assert_eq!(lines.next(), Some("10,1e-5,3,0"));
    }
}
