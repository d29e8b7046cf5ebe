//! In-memory coordination double for election and shutdown tests

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::CoordinationClient;
use crate::error::{Error, Result};

/// Scripted in-memory stand-in for the coordination service.
///
/// Creates assign zero-padded sequence suffixes from a configurable start.
/// Children snapshots come from a script queue when one is loaded,
/// otherwise from the live set that `auto_join` creates maintain.
pub(crate) struct MockCoordination {
    connected: AtomicBool,
    sequence: AtomicU64,
    auto_join: bool,
    existing: Mutex<HashSet<String>>,
    live_children: Mutex<Vec<String>>,
    children_script: Mutex<VecDeque<Vec<String>>>,
    create_calls: AtomicUsize,
    failing_creates: AtomicUsize,
    delete_calls: Mutex<Vec<String>>,
}

impl MockCoordination {
    pub fn new(start_sequence: u64, auto_join: bool) -> Self {
        Self {
            connected: AtomicBool::new(true),
            sequence: AtomicU64::new(start_sequence),
            auto_join,
            existing: Mutex::new(HashSet::new()),
            live_children: Mutex::new(Vec::new()),
            children_script: Mutex::new(VecDeque::new()),
            create_calls: AtomicUsize::new(0),
            failing_creates: AtomicUsize::new(0),
            delete_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one children snapshot; consumed in order before the live set
    pub fn push_children(&self, children: Vec<String>) {
        self.children_script.lock().unwrap().push_back(children);
    }

    /// Add a child owned by some other process to the live set
    pub fn seed_child(&self, name: &str) {
        self.live_children.lock().unwrap().push(name.to_string());
    }

    /// Make the next `n` create calls fail with a coordination error
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.delete_calls.lock().unwrap().len()
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.delete_calls.lock().unwrap().clone()
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationClient for MockCoordination {
    async fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Session("session not connected".to_string()))
        }
    }

    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_creates.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Coordination("create failed".to_string()));
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let path = format!("{}{:010}", path_prefix, seq);
        self.existing.lock().unwrap().insert(path.clone());
        if self.auto_join {
            let name = path.rsplit('/').next().unwrap().to_string();
            self.live_children.lock().unwrap().push(name);
        }
        Ok(path)
    }

    async fn get_children(&self, _path: &str, _watch: bool) -> Result<Vec<String>> {
        if let Some(scripted) = self.children_script.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(self.live_children.lock().unwrap().clone())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.existing.lock().unwrap().contains(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.delete_calls.lock().unwrap().push(path.to_string());
        self.existing.lock().unwrap().remove(path);
        let name = path.rsplit('/').next().unwrap();
        self.live_children.lock().unwrap().retain(|c| c != name);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
