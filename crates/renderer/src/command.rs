//! Inbound commands and the channel that carries them onto the render thread.
//!
//! The queue is the only structure shared between threads. Producers call
//! [`CommandSender::submit`] from anywhere; the render loop drains the queue
//! once per frame before rendering.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::ChannelClosed;
use crate::types::{BlurSettings, DisplayTarget, UniformValue};

/// Request to load a new fragment shader onto one or both fins.
#[derive(Debug, Clone)]
pub struct ShaderChange {
    pub target: DisplayTarget,
    pub source: Arc<str>,
    pub transition: Duration,
    pub scale: f32,
    /// Animation name reported in status snapshots.
    pub name: Option<String>,
}

impl ShaderChange {
    pub fn new(target: DisplayTarget, source: impl Into<Arc<str>>) -> Self {
        Self {
            target,
            source: source.into(),
            transition: Duration::ZERO,
            scale: 1.0,
            name: None,
        }
    }

    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Request to set a custom uniform on one or both fins.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformChange {
    pub target: DisplayTarget,
    pub name: String,
    pub value: UniformValue,
}

#[derive(Debug, Clone)]
pub enum Command {
    ShaderChange(ShaderChange),
    UniformChange(UniformChange),
    /// Suspend (or resume) shader rendering; the fins show black meanwhile.
    SetBlanked(bool),
    SetBlur(BlurSettings),
    Shutdown,
}

impl From<ShaderChange> for Command {
    fn from(value: ShaderChange) -> Self {
        Command::ShaderChange(value)
    }
}

impl From<UniformChange> for Command {
    fn from(value: UniformChange) -> Self {
        Command::UniformChange(value)
    }
}

/// Creates a connected sender/queue pair.
pub fn channel() -> (CommandSender, CommandQueue) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (CommandSender { tx }, CommandQueue { rx })
}

/// Cloneable producer half; safe to use from any thread.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Enqueues without blocking. Fails only once the render side is gone.
    pub fn submit(&self, command: impl Into<Command>) -> Result<(), ChannelClosed> {
        self.tx.send(command.into()).map_err(|_| ChannelClosed)
    }
}

/// Render-thread half of the channel.
#[derive(Debug)]
pub struct CommandQueue {
    rx: Receiver<Command>,
}

impl CommandQueue {
    /// Pops the commands that were queued when the drain started, in FIFO order.
    ///
    /// Anything submitted while the batch is being applied waits for the next frame.
    pub fn drain(&self) -> Vec<Command> {
        let pending = self.rx.len();
        let mut batch = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(command) => batch.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batch
    }
}
