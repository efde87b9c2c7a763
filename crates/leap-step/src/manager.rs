use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use leap_jdwp::DebugEngine;
use parking_lot::Mutex;

use crate::error::{Result, StepError};

type Command = Box<dyn FnOnce(&mut dyn DebugEngine) + Send + 'static>;

/// The single thread allowed to talk to a session's [`DebugEngine`].
///
/// Commands run in submission order. A panicking command is logged and
/// dropped; the thread keeps serving later commands.
pub struct ManagerThread {
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: thread::ThreadId,
}

impl ManagerThread {
    pub fn spawn<E>(name: &str, mut engine: E) -> Result<Self>
    where
        E: DebugEngine + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Command>();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                for command in receiver {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| command(&mut engine)));
                    if result.is_err() {
                        tracing::error!(
                            target: "leap.step",
                            "panic in manager command; recovering"
                        );
                    }
                }
                tracing::debug!(target: "leap.step", "manager thread exiting");
            })
            .map_err(StepError::Spawn)?;
        let thread_id = handle.thread().id();

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    pub fn is_manager_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queues `command` without waiting for it.
    pub fn schedule<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(&mut dyn DebugEngine) + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(StepError::SessionClosed)?;
        sender
            .send(Box::new(command))
            .map_err(|_| StepError::SessionClosed)
    }

    /// Runs `command` on the manager thread and blocks for its result.
    ///
    /// Fails with [`StepError::ReentrantWait`] when called from the manager
    /// thread, where waiting would deadlock.
    pub fn invoke_and_wait<F, T>(&self, command: F) -> Result<T>
    where
        F: FnOnce(&mut dyn DebugEngine) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_manager_thread() {
            return Err(StepError::ReentrantWait);
        }
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        self.schedule(move |engine| {
            let _ = result_tx.send(command(engine));
        })?;
        result_rx.recv().map_err(|_| StepError::CommandPanicked)
    }

    /// Stops accepting commands, lets the queued ones run, and joins the
    /// thread (unless called from it).
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if self.is_manager_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!(target: "leap.step", "manager thread terminated by a panic");
            }
        }
    }
}

impl Drop for ManagerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
