//! State Management Module
//!
//! Snapshot undo/redo history and change notification fan-out.

pub mod notifier;
pub mod undo;

pub use notifier::{ChangeNotifier, ListenerId};
pub use undo::{UndoEvent, UndoEventType, UndoListener, UndoManager, UndoPoint};
