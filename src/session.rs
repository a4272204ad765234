//! Server-side session container (§3 "Session").

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use chrono::{DateTime, Utc};

use crate::pane::Window;

/// A server-side container persisting one window across client disconnects.
pub struct Session {
    pub id: u32,
    pub name: Option<String>,
    pub window: Window,
    /// -1 (`None`) while detached.
    pub client_fd: Option<RawFd>,
    pub detached: bool,
    pub cols: u16,
    pub rows: u16,
    pub created_at: DateTime<Utc>,
    /// Latest serialized grid uploaded by the client before detaching,
    /// keyed by pane id. Consumed (removed) once shipped to the next
    /// attaching client.
    pub snapshots: HashMap<u32, Vec<u8>>,
}

impl Session {
    pub fn new(id: u32, name: Option<String>) -> Self {
        Session {
            id,
            name,
            window: Window::create(format!("session-{id}")),
            client_fd: None,
            detached: true,
            cols: 80,
            rows: 24,
            created_at: Utc::now(),
            snapshots: HashMap::new(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} [{}]", self.id),
            None => self.id.to_string(),
        }
    }

    /// A session is fully exited once every pane's child process slot has
    /// gone away (§4.E reap pass).
    pub fn is_fully_exited(&self) -> bool {
        self.window.panes.iter_indices().count() == 0
    }

    pub fn store_snapshot(&mut self, pane_id: u32, bytes: Vec<u8>) {
        self.snapshots.insert(pane_id, bytes);
    }

    pub fn take_snapshot(&mut self, pane_id: u32) -> Option<Vec<u8>> {
        self.snapshots.remove(&pane_id)
    }
}

/// Registry of live sessions, keyed by their server-assigned id. Ids are a
/// strictly monotonic counter that never recycles (§8 property 8).
pub struct SessionRegistry {
    sessions: Vec<Session>,
    next_id: u32,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: Vec::new(),
            next_id: 0,
        }
    }

    pub fn create(&mut self, name: Option<String>) -> &mut Session {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.push(Session::new(id, name));
        self.sessions.last_mut().unwrap()
    }

    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn find_by_client_fd_mut(&mut self, fd: RawFd) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.client_fd == Some(fd))
    }

    pub fn remove(&mut self, id: u32) -> Option<Session> {
        let pos = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn retain_live(&mut self) {
        self.sessions.retain(|s| !s.is_fully_exited());
    }

    /// Render the `LIST_SESSIONS` reply text: one line per session, or the
    /// localized "no sessions" marker.
    pub fn list_text(&self, no_sessions_marker: &str) -> String {
        if self.sessions.is_empty() {
            return no_sessions_marker.to_string();
        }
        self.sessions
            .iter()
            .map(|s| {
                format!(
                    "{}\tpanes={}\t{}",
                    s.display_name(),
                    s.window.pane_count(),
                    if s.detached { "detached" } else { "attached" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_never_recycle() {
        let mut reg = SessionRegistry::new();
        let id0 = reg.create(None).id;
        let id1 = reg.create(None).id;
        reg.remove(id0);
        let id2 = reg.create(None).id;
        assert!(id1 > id0);
        assert!(id2 > id1);
        assert!(reg.get(id0).is_none());
    }

    #[test]
    fn list_text_reports_no_sessions_marker() {
        let reg = SessionRegistry::new();
        assert_eq!(reg.list_text("no sessions"), "no sessions");
    }
}
