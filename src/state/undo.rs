//! Undo/Redo System
//!
//! A bounded history of snapshots. The manager only stores and hands back
//! snapshots; swapping them into live objects is the owner's job, which
//! pushes the current state onto the opposite stack before restoring.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{LayerError, Result};

/// Comments longer than this are shortened for display.
pub const COMMENT_MAX_LENGTH: usize = 40;

/// A single snapshot with its comment
#[derive(Debug, Clone)]
pub struct UndoPoint<T> {
    /// Unique identifier for this point.
    pub id: String,

    /// Human-readable description of the state.
    pub comment: String,

    /// When the point was recorded.
    pub created_at: DateTime<Utc>,

    /// The snapshot itself.
    pub data: T,
}

impl<T> UndoPoint<T> {
    pub fn new(data: T, comment: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            comment: comment.into(),
            created_at: Utc::now(),
            data,
        }
    }
}

/// Kinds of changes reported to [`UndoListener`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoEventType {
    AddUndo,
    AddRedo,
    Undo,
    Redo,
    Clear,
}

impl fmt::Display for UndoEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoEventType::AddUndo => write!(f, "Add Undo"),
            UndoEventType::AddRedo => write!(f, "Add Redo"),
            UndoEventType::Undo => write!(f, "Undo"),
            UndoEventType::Redo => write!(f, "Redo"),
            UndoEventType::Clear => write!(f, "Clear"),
        }
    }
}

/// Notification sent after the history changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEvent {
    pub event_type: UndoEventType,
    /// Comment of the point involved, `None` for [`UndoEventType::Clear`]
    pub comment: Option<String>,
    pub undo_count: usize,
    pub redo_count: usize,
}

/// Observer of history changes, e.g. to enable undo/redo buttons
pub trait UndoListener {
    fn undo_occurred(&mut self, event: &UndoEvent);
}

impl<F: FnMut(&UndoEvent)> UndoListener for F {
    fn undo_occurred(&mut self, event: &UndoEvent) {
        self(event)
    }
}

/// Bounded undo/redo stacks of snapshots.
///
/// Adding a fresh undo point clears the redo stack. The depth limit
/// counts both stacks together, and the newest undo point is never
/// trimmed.
pub struct UndoManager<T> {
    undo_stack: Vec<UndoPoint<T>>,
    redo_stack: Vec<UndoPoint<T>>,
    max_undo: Option<usize>,
    enabled: bool,
    listeners: Vec<Box<dyn UndoListener>>,
}

impl<T> fmt::Debug for UndoManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoManager")
            .field("undo_count", &self.undo_stack.len())
            .field("redo_count", &self.redo_stack.len())
            .field("max_undo", &self.max_undo)
            .field("enabled", &self.enabled)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<T> Default for UndoManager<T> {
    fn default() -> Self {
        Self::new(Some(crate::config::DEFAULT_MAX_UNDO))
    }
}

impl<T> UndoManager<T> {
    /// Create an undo manager; `None` means unlimited depth.
    pub fn new(max_undo: Option<usize>) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_undo,
            enabled: true,
            listeners: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn max_undo(&self) -> Option<usize> {
        self.max_undo
    }

    /// Change the depth limit.
    ///
    /// Only allowed while both stacks are empty.
    pub fn set_max_undo(&mut self, max_undo: Option<usize>) -> Result<()> {
        if max_undo == Some(0) {
            return Err(LayerError::invalid(
                "max_undo",
                "must be greater than 0, or None for unlimited",
            ));
        }
        if !self.undo_stack.is_empty() || !self.redo_stack.is_empty() {
            return Err(LayerError::UndoLimitLocked);
        }
        self.max_undo = max_undo;
        Ok(())
    }

    /// Record a snapshot; clears the redo stack.
    ///
    /// Returns false if the manager is disabled.
    pub fn add_undo(&mut self, data: T, comment: impl Into<String>) -> bool {
        self.add_undo_with(data, comment, false)
    }

    /// Record a snapshot, optionally keeping the redo stack.
    ///
    /// Keeping redo is what a redo itself needs: the state it replaces
    /// goes back on the undo stack without invalidating further redos.
    pub fn add_undo_with(&mut self, data: T, comment: impl Into<String>, keep_redo: bool) -> bool {
        if !self.enabled {
            return false;
        }
        let point = UndoPoint::new(data, comment);
        let comment = point.comment.clone();
        self.undo_stack.push(point);
        if !keep_redo {
            self.redo_stack.clear();
        }
        self.trim_history();
        self.notify(UndoEventType::AddUndo, Some(comment));
        true
    }

    /// Record a snapshot on the redo stack
    pub fn add_redo(&mut self, data: T, comment: impl Into<String>) -> bool {
        if !self.enabled {
            return false;
        }
        let point = UndoPoint::new(data, comment);
        let comment = point.comment.clone();
        self.redo_stack.push(point);
        self.notify(UndoEventType::AddRedo, Some(comment));
        true
    }

    pub fn can_undo(&self) -> bool {
        self.enabled && !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.enabled && !self.redo_stack.is_empty()
    }

    /// Pop the most recent undo point, `None` when there is nothing to undo
    pub fn undo(&mut self) -> Option<UndoPoint<T>> {
        if !self.can_undo() {
            return None;
        }
        let point = self.undo_stack.pop()?;
        self.notify(UndoEventType::Undo, Some(point.comment.clone()));
        Some(point)
    }

    /// Pop the most recent redo point, `None` when there is nothing to redo
    pub fn redo(&mut self) -> Option<UndoPoint<T>> {
        if !self.can_redo() {
            return None;
        }
        let point = self.redo_stack.pop()?;
        self.notify(UndoEventType::Redo, Some(point.comment.clone()));
        Some(point)
    }

    pub fn peek_undo(&self) -> Option<&UndoPoint<T>> {
        self.undo_stack.last()
    }

    pub fn peek_redo(&self) -> Option<&UndoPoint<T>> {
        self.redo_stack.last()
    }

    pub fn peek_undo_comment(&self, shorten: bool) -> Option<String> {
        self.peek_undo().map(|p| display_comment(&p.comment, shorten))
    }

    pub fn peek_redo_comment(&self, shorten: bool) -> Option<String> {
        self.peek_redo().map(|p| display_comment(&p.comment, shorten))
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Comments of the undo stack, most recent first
    pub fn undo_comments(&self) -> Vec<&str> {
        self.undo_stack.iter().rev().map(|p| p.comment.as_str()).collect()
    }

    /// Comments of the redo stack, most recently undone first
    pub fn redo_comments(&self) -> Vec<&str> {
        self.redo_stack.iter().rev().map(|p| p.comment.as_str()).collect()
    }

    /// Drop all undo and redo points
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.notify(UndoEventType::Clear, None);
    }

    pub fn add_listener(&mut self, listener: Box<dyn UndoListener>) {
        self.listeners.push(listener);
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    fn trim_history(&mut self) {
        let Some(max) = self.max_undo else {
            return;
        };
        while self.undo_stack.len() > 1 && self.undo_stack.len() + self.redo_stack.len() > max {
            self.undo_stack.remove(0);
        }
    }

    fn notify(&mut self, event_type: UndoEventType, comment: Option<String>) {
        if self.listeners.is_empty() {
            return;
        }
        let event = UndoEvent {
            event_type,
            comment,
            undo_count: self.undo_stack.len(),
            redo_count: self.redo_stack.len(),
        };
        for listener in &mut self.listeners {
            listener.undo_occurred(&event);
        }
    }
}

fn display_comment(comment: &str, shorten: bool) -> String {
    if shorten && comment.chars().count() > COMMENT_MAX_LENGTH {
        let mut short: String = comment.chars().take(COMMENT_MAX_LENGTH).collect();
        short.push_str("...");
        short
    } else {
        comment.to_string()
    }
}
