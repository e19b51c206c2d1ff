//! Per-handle latency statistics
//!
//! One record per live `(path, fd)` pair. Descriptors are allocated per
//! backend, so the path is part of the key.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// Byte counts and wall-clock timings for one open file
#[derive(Debug, Clone, Default)]
pub struct HandleStats {
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes_total: u64,
    pub write_bytes_total: u64,
    pub read_time_total: Duration,
    pub write_time_total: Duration,
    pub last_read_bytes: u64,
    pub last_write_bytes: u64,
    pub last_read_time: Duration,
    pub last_write_time: Duration,
}

impl HandleStats {
    fn record_read(&mut self, bytes: u64, elapsed: Duration) {
        self.read_ops += 1;
        self.read_bytes_total += bytes;
        self.read_time_total += elapsed;
        self.last_read_bytes = bytes;
        self.last_read_time = elapsed;
    }

    fn record_write(&mut self, bytes: u64, elapsed: Duration) {
        self.write_ops += 1;
        self.write_bytes_total += bytes;
        self.write_time_total += elapsed;
        self.last_write_bytes = bytes;
        self.last_write_time = elapsed;
    }
}

/// Statistics records for all live descriptors
pub struct StatsTable {
    records: RwLock<HashMap<(String, u64), HandleStats>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a record on open/create.
    pub fn open(&self, path: &str, fd: u64) {
        self.records
            .write()
            .insert((path.to_string(), fd), HandleStats::default());
    }

    /// Drop the record on release.
    pub fn close(&self, path: &str, fd: u64) {
        self.records.write().remove(&(path.to_string(), fd));
    }

    pub fn record_read(&self, path: &str, fd: u64, bytes: u64, elapsed: Duration) {
        if let Some(record) = self.records.write().get_mut(&(path.to_string(), fd)) {
            record.record_read(bytes, elapsed);
        }
    }

    pub fn record_write(&self, path: &str, fd: u64, bytes: u64, elapsed: Duration) {
        if let Some(record) = self.records.write().get_mut(&(path.to_string(), fd)) {
            record.record_write(bytes, elapsed);
        }
    }

    /// Snapshot of one record, if the descriptor is live.
    pub fn get(&self, path: &str, fd: u64) -> Option<HandleStats> {
        self.records.read().get(&(path.to_string(), fd)).cloned()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for StatsTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_record_close() {
        let table = StatsTable::new();
        table.open("/f", 1);
        assert!(table.get("/f", 1).is_some());

        table.close("/f", 1);
        assert!(table.get("/f", 1).is_none());
    }

    #[test]
    fn test_accumulation() {
        let table = StatsTable::new();
        table.open("/f", 1);

        table.record_read("/f", 1, 100, Duration::from_millis(2));
        table.record_read("/f", 1, 50, Duration::from_millis(1));
        table.record_write("/f", 1, 7, Duration::from_millis(3));

        let stats = table.get("/f", 1).unwrap();
        assert_eq!(stats.read_ops, 2);
        assert_eq!(stats.read_bytes_total, 150);
        assert_eq!(stats.last_read_bytes, 50);
        assert_eq!(stats.read_time_total, Duration::from_millis(3));
        assert_eq!(stats.write_ops, 1);
        assert_eq!(stats.write_bytes_total, 7);
        assert_eq!(stats.last_write_bytes, 7);
    }

    #[test]
    fn test_same_fd_different_paths_are_distinct() {
        let table = StatsTable::new();
        table.open("/a", 1);
        table.open("/b", 1);

        table.record_read("/a", 1, 10, Duration::ZERO);
        assert_eq!(table.get("/a", 1).unwrap().read_bytes_total, 10);
        assert_eq!(table.get("/b", 1).unwrap().read_bytes_total, 0);
    }

    #[test]
    fn test_record_after_close_is_ignored() {
        let table = StatsTable::new();
        table.open("/f", 1);
        table.close("/f", 1);
        table.record_read("/f", 1, 10, Duration::ZERO);
        assert!(table.get("/f", 1).is_none());
    }
}
