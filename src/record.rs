use std::io::Read;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

/// One input row: field name to raw string value, in header order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing an existing value in place.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// `{"put": "<namespace><key>", "fields": {...}}`, one document for the search engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub put: String,
    pub fields: Map<String, Value>,
}

/// Streams records out of a CSV source with a header row.
pub struct CsvSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
}

impl CsvSource<std::fs::File> {
    pub fn open(path: &Path) -> Result<Self, csv::Error> {
        Self::from_reader(std::fs::File::open(path)?)
    }
}

impl<R: Read> CsvSource<R> {
    pub fn from_reader(rdr: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self { reader, headers })
    }

    /// Records in file order. Short rows leave trailing fields out; surplus cells are dropped.
    pub fn records(&mut self) -> impl Iterator<Item = Result<Record, csv::Error>> + '_ {
        let headers = &self.headers;
        self.reader.records().map(move |row| {
            let row = row?;
            let mut record = Record::new();
            for (name, value) in headers.iter().zip(row.iter()) {
                record.set(name, value);
            }
            Ok(record)
        })
    }
}
