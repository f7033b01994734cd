use log::debug;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::container_management::runtime::ContainerRuntime;

/// Byte ceiling for log text fetched from a preview container.
pub const PREVIEW_LOG_LIMIT: usize = 256 * 1024;

/// Last captured logs of previews that no longer have a container.
///
/// Holds at most `capacity` entries; the oldest is evicted first.
pub struct LogArchive {
    capacity: usize,
    entries: Mutex<VecDeque<(String, String)>>,
}

impl LogArchive {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, VecDeque<(String, String)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self, record_id: &str, text: String) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries();
        entries.retain(|(id, _)| id != record_id);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back((record_id.to_string(), text));
    }

    pub fn get(&self, record_id: &str) -> Option<String> {
        self.entries()
            .iter()
            .find(|(id, _)| id == record_id)
            .map(|(_, text)| text.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Fetches the container's recent logs and keeps them under `record_id`.
    ///
    /// Returns the captured text; empty if the engine had nothing to give.
    pub async fn capture(
        &self,
        runtime: &dyn ContainerRuntime,
        record_id: &str,
        runtime_id: &str,
        tail: usize,
    ) -> String {
        match runtime.logs(runtime_id, Some(tail), PREVIEW_LOG_LIMIT).await {
            Ok(logs) => {
                let text = logs.combined();
                self.store(record_id, text.clone());
                text
            }
            Err(e) => {
                debug!("No logs captured for {}: {}", record_id, e);
                String::new()
            }
        }
    }
}
