//! Readers for `push` input files: CSV with a header row for passive, entrada
//! and zone observations, JSON lines for CT log entries.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub fn csv_entries<E: DeserializeOwned>(path: &Path) -> Result<impl Iterator<Item = Result<E>>> {
    let rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    Ok(rdr.into_deserialize::<E>().enumerate().map(|(i, row)| row.with_context(|| format!("row {}", i + 1))))
}

pub fn jsonl_entries<E: DeserializeOwned>(path: &Path) -> Result<impl Iterator<Item = Result<E>>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(BufReader::new(file).lines().enumerate().filter_map(|(i, line)| match line {
        Ok(l) if l.trim().is_empty() => None,
        Ok(l) => Some(serde_json::from_str(&l).with_context(|| format!("line {}", i + 1))),
        Err(e) => Some(Err(e.into())),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wire::{EntradaEntry, LogEntry, PassiveEntry, ZoneEntry, ZoneType};

    fn file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn passive_csv() {
        let f = file("query,query_type,timestamp_ms\nwww.a.com, A ,10\nbad.com,MX,notanumber\n");
        let rows: Vec<Result<PassiveEntry>> = csv_entries(f.path()).unwrap().collect();
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.query_type, "A");
        assert_eq!(first.timestamp_ms, 10);
        assert!(format!("{:#}", rows[1].as_ref().unwrap_err()).contains("row 2"));
    }

    #[test]
    fn entrada_last_seen_is_optional() {
        let f = file("fqdn,timestamp_ms,last_seen_ms\na.example.nl,5,\nb.example.nl,5,9\n");
        let rows: Vec<EntradaEntry> = csv_entries(f.path()).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].last_seen_ms, None);
        assert_eq!(rows[1].last_seen_ms, Some(9));
    }

    #[test]
    fn zone_csv_uses_type_column() {
        let f = file("apex,type,timestamp_ms\nexample.org,EXPIRATION,77\n");
        let rows: Vec<ZoneEntry> = csv_entries(f.path()).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].kind, ZoneType::Expiration);
    }

    #[test]
    fn ct_jsonl_skips_blank_lines() {
        let f = file(concat!(
            r#"{"cert_der":"MIL/","index":1,"timestamp_ms":2,"log":{"url":"https://ct.example/"}}"#,
            "\n\n",
            r#"{"cert_der":"MIL/"}"#,
            "\n"
        ));
        let rows: Vec<Result<LogEntry>> = jsonl_entries(f.path()).unwrap().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_ref().unwrap().cert_der, vec![0x30, 0x82, 0xff]);
        assert!(format!("{:#}", rows[1].as_ref().unwrap_err()).contains("line 3"));
    }
}
