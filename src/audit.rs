//! Audit trail of correlated binding requests
//!
//! Every request that is matched to a server-reflexive candidate is written
//! out once, together with a checksum and what the browser said about itself.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crc::{Crc, CRC_64_GO_ISO};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::NatResult;
use crate::storage::CorrelationKey;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// CRC-64 (ISO polynomial, reflected, all-ones init and xor-out) of `data`
pub fn crc64(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Browser and OS reported by the client that posted the SDP
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientMetadata {
    pub browser: String,
    pub browser_version: String,
    pub os: String,
}

impl ClientMetadata {
    pub fn new(browser: impl Into<String>, browser_version: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            browser: browser.into(),
            browser_version: browser_version.into(),
            os: os.into(),
        }
    }

    /// Best-effort User-Agent parsing; unknown parts are left empty
    pub fn from_user_agent(user_agent: &str) -> Self {
        let (browser, browser_version) = detect_browser(user_agent);
        Self {
            browser: browser.to_string(),
            browser_version,
            os: detect_os(user_agent),
        }
    }
}

/// Product tokens checked in order; later browsers embed the earlier ones' tokens
const BROWSERS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("Edge/", "Edge"),
    ("OPR/", "Opera"),
    ("YaBrowser/", "YaBrowser"),
    ("Firefox/", "Firefox"),
    ("FxiOS/", "Firefox"),
    ("CriOS/", "Chrome"),
    ("Chromium/", "Chromium"),
    ("Chrome/", "Chrome"),
];

fn token_version(user_agent: &str, token: &str) -> Option<String> {
    let start = user_agent.find(token)? + token.len();
    let version: String = user_agent[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
        .collect();
    Some(version)
}

fn detect_browser(user_agent: &str) -> (&'static str, String) {
    for &(token, name) in BROWSERS {
        if let Some(version) = token_version(user_agent, token) {
            return (name, version);
        }
    }

    if user_agent.contains("Safari/") {
        let version = token_version(user_agent, "Version/").unwrap_or_default();
        return ("Safari", version);
    }

    ("", String::new())
}

fn detect_os(user_agent: &str) -> String {
    let platform = match (user_agent.find('('), user_agent.find(')')) {
        (Some(start), Some(end)) if start < end => &user_agent[start + 1..end],
        _ => return String::new(),
    };

    if let Some(version) = token_version(platform, "Android ") {
        return format!("Android {}", version);
    }
    if platform.contains("iPhone") || platform.contains("iPad") {
        return match token_version(platform, " OS ") {
            Some(version) => format!("iOS {}", version.replace('_', ".")),
            None => "iOS".to_string(),
        };
    }
    if let Some(version) = token_version(platform, "Windows NT ") {
        let name = match version.as_str() {
            "10.0" => "Windows 10",
            "6.3" => "Windows 8.1",
            "6.2" => "Windows 8",
            "6.1" => "Windows 7",
            _ => return format!("Windows NT {}", version),
        };
        return name.to_string();
    }
    if let Some(version) = token_version(platform, "Mac OS X ") {
        return format!("Mac OS X {}", version.replace('_', "."));
    }
    if platform.contains("CrOS") {
        return "Chrome OS".to_string();
    }
    if platform.contains("Linux") {
        return "Linux".to_string();
    }

    String::new()
}

/// One correlated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub key: CorrelationKey,
    /// Standard base64 of the raw request bytes
    pub payload_b64: String,
    /// [`crc64`] of the raw request bytes
    pub checksum: u64,
    pub client: ClientMetadata,
}

impl AuditRecord {
    pub fn new(key: CorrelationKey, raw: &[u8], client: ClientMetadata) -> Self {
        Self {
            key,
            payload_b64: STANDARD.encode(raw),
            checksum: crc64(raw),
            client,
        }
    }

    /// `key,base64,crc64,browser,browser_version,os` with RFC 4180 quoting, no line ending
    pub fn csv_row(&self) -> String {
        let checksum = self.checksum.to_string();
        let fields = [
            self.key.as_str(),
            self.payload_b64.as_str(),
            checksum.as_str(),
            self.client.browser.as_str(),
            self.client.browser_version.as_str(),
            self.client.os.as_str(),
        ];

        fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",")
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) || field.starts_with(' ') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> NatResult<()>;
}

/// Append-only CSV file, flushed after every record
pub struct CsvAuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl CsvAuditLog {
    /// Open (creating if needed) `path` for appending
    pub fn open(path: impl AsRef<Path>) -> NatResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("audit: appending to {}", path.display());

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for CsvAuditLog {
    fn append(&self, record: &AuditRecord) -> NatResult<()> {
        let mut writer = self.writer.lock();
        writer.write_all(record.csv_row().as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!("audit: wrote record for {}", record.key);
        Ok(())
    }
}

/// Records kept in memory
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> NatResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.109 Safari/537.36";
    const FIREFOX_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1.2 Mobile/15E148 Safari/604.1";
    const EDGE_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.77";
    const CHROME_ANDROID: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36";

    #[test]
    fn test_crc64_check_value() {
        assert_eq!(crc64(b"123456789"), CRC_64_GO_ISO.check);
        assert_eq!(crc64(b""), 0);
    }

    #[test]
    fn test_user_agents() {
        let cases = [
            (CHROME_LINUX, ("Chrome", "120.0.6099.109", "Linux")),
            (FIREFOX_WINDOWS, ("Firefox", "121.0", "Windows 10")),
            (SAFARI_IPHONE, ("Safari", "17.1.2", "iOS 17.1.2")),
            (EDGE_MAC, ("Edge", "120.0.2210.77", "Mac OS X 10.15.7")),
            (CHROME_ANDROID, ("Chrome", "120.0.6099.144", "Android 14")),
        ];

        for (ua, (browser, version, os)) in cases {
            assert_eq!(ClientMetadata::from_user_agent(ua), ClientMetadata::new(browser, version, os), "{}", ua);
        }

        assert_eq!(ClientMetadata::from_user_agent("curl/8.4.0"), ClientMetadata::default());
    }

    #[test]
    fn test_csv_row_quoting() {
        let record = AuditRecord::new(
            CorrelationKey::from_socket_addr("203.0.113.5:4000".parse().unwrap()),
            b"\x00\x01",
            ClientMetadata::new("Some \"Browser\"", "1,2", "OS"),
        );

        assert_eq!(record.payload_b64, "AAE=");
        assert_eq!(
            record.csv_row(),
            format!("203.0.113.5:4000,AAE=,{},\"Some \"\"Browser\"\"\",\"1,2\",OS", crc64(b"\x00\x01"))
        );
    }

    #[test]
    fn test_csv_log_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packets.log");
        let key = CorrelationKey::from_socket_addr("198.51.100.7:61000".parse().unwrap());

        {
            let log = CsvAuditLog::open(&path).unwrap();
            log.append(&AuditRecord::new(key.clone(), b"first", ClientMetadata::default()))
                .unwrap();
            // flushed per record, visible before drop
            let contents = std::fs::read_to_string(log.path()).unwrap();
            assert_eq!(contents.lines().count(), 1);
        }

        let log = CsvAuditLog::open(&path).unwrap();
        log.append(&AuditRecord::new(key, b"second", ClientMetadata::default()))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<_> = contents.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("198.51.100.7:61000,Zmlyc3Q=,"));
        assert!(rows[1].starts_with("198.51.100.7:61000,c2Vjb25k,"));
        assert!(rows[1].ends_with(",,,"));
    }

    #[test]
    fn test_memory_log() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());

        let record = AuditRecord::new(
            CorrelationKey::from_socket_addr("203.0.113.5:4000".parse().unwrap()),
            b"raw",
            ClientMetadata::default(),
        );
        log.append(&record).unwrap();
        assert_eq!(log.records(), vec![record]);
    }
}
