//! The editor side of a session: line highlights for single-shot breakpoints.
//!
//! The manager thread never touches the editor directly. It posts closures on
//! a [`UiQueue`]; whoever owns the editor drains them with [`UiPump::pump`].

use std::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HighlightId(pub u64);

pub trait LineHighlighter {
    /// Highlights a 0-based editor line.
    fn add_highlight(&mut self, document: DocumentId, line: u32) -> HighlightId;

    fn remove_highlight(&mut self, highlight: HighlightId);
}

type UiTask = Box<dyn FnOnce(&mut dyn LineHighlighter) + Send + 'static>;

#[derive(Clone)]
pub struct UiQueue {
    sender: mpsc::Sender<UiTask>,
}

pub struct UiPump {
    receiver: mpsc::Receiver<UiTask>,
}

pub fn ui_channel() -> (UiQueue, UiPump) {
    let (sender, receiver) = mpsc::channel();
    (UiQueue { sender }, UiPump { receiver })
}

impl UiQueue {
    /// Posts `task` for the UI side. Returns `false` if the pump is gone, in
    /// which case the task is dropped unrun.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut dyn LineHighlighter) + Send + 'static,
    {
        self.sender.send(Box::new(task)).is_ok()
    }
}

impl UiPump {
    /// Runs every task queued so far. Returns how many ran.
    pub fn pump(&self, highlighter: &mut dyn LineHighlighter) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task(highlighter);
            ran += 1;
        }
        ran
    }
}
