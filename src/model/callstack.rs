//! Call stack of the thread being inspected

use std::sync::Mutex;

use crate::common::lock;
use crate::dap::StackFrame;

use super::signal::Signal;

/// Frames shown in the call stack and the one the user has selected
#[derive(Default)]
pub struct CallstackModel {
    frames: Mutex<Vec<StackFrame>>,
    current: Mutex<Option<StackFrame>>,
    frames_changed: Signal<Vec<StackFrame>>,
    current_frame_changed: Signal<StackFrame>,
}

impl CallstackModel {
    pub fn frames(&self) -> Vec<StackFrame> {
        lock(&self.frames).clone()
    }

    /// Replace the displayed frames. Clears the selection if the selected
    /// frame is no longer on the stack.
    pub fn set_frames(&self, frames: Vec<StackFrame>) {
        {
            let mut current = lock(&self.current);
            if let Some(selected) = current.as_ref() {
                if !frames.iter().any(|f| f.id == selected.id) {
                    *current = None;
                }
            }
        }
        *lock(&self.frames) = frames.clone();
        self.frames_changed.emit(frames);
    }

    pub fn current_frame(&self) -> Option<StackFrame> {
        lock(&self.current).clone()
    }

    /// Select a frame by id. Returns the frame, or `None` if it isn't on
    /// the stack.
    pub fn select_frame(&self, id: i64) -> Option<StackFrame> {
        let frame = lock(&self.frames).iter().find(|f| f.id == id).cloned()?;
        *lock(&self.current) = Some(frame.clone());
        self.current_frame_changed.emit(frame.clone());
        Some(frame)
    }

    pub fn frames_changed(&self) -> &Signal<Vec<StackFrame>> {
        &self.frames_changed
    }

    pub fn current_frame_changed(&self) -> &Signal<StackFrame> {
        &self.current_frame_changed
    }
}
