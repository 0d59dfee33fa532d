//! Render engine for the two fin displays.
//!
//! Both fins live in one borderless window. Each fin runs its own fragment
//! shader into an off-screen A/B target pair at an adjustable render scale,
//! and the compositor scales the result into the fin's viewport, crossfading
//! (with an optional blur) while a new shader takes over.
//!
//! ```text
//!   control thread ──CommandSender──▶ CommandQueue
//!                                          │ drained once per frame
//!                                          ▼
//!   WindowRuntime ──▶ winit loop ──▶ Engine::frame ──▶ DisplaySlot × 2
//!                                          │
//!                                          ▼
//!                                   WgpuBackend::render ──▶ surface
//! ```
//!
//! [`Engine`] holds all scheduling state and is generic over
//! [`RenderBackend`], so transitions, queuing, and the scale policy can be
//! exercised without a GPU.

pub mod audio;
pub mod backend;
pub mod command;
pub mod compile;
pub mod display;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod runtime;
pub mod status;
pub mod timeline;
pub mod types;
pub mod uniforms;
pub mod window;

#[cfg(test)]
mod testing;

pub use audio::{feed, AudioFeed, AudioFrame, AudioPublisher, AudioSource, SilentAudio};
pub use backend::RenderBackend;
pub use command::{channel, Command, CommandQueue, CommandSender, ShaderChange, UniformChange};
pub use compile::{inspect, wrap_fragment, SourceInfo};
pub use engine::Engine;
pub use error::{AllocationError, ChannelClosed, CompileError, ParamError, UniformError};
pub use gpu::{RenderError, WgpuBackend};
pub use status::{
    DisplayPerformance, DisplayUniforms, NullStatus, PerformanceStatus, ShaderStatus, StatusSink,
    TransitionStatus, UniformStatus,
};
pub use types::{
    BlurSettings, CrossfadeCurve, DisplayGeometry, DisplayId, DisplayTarget, RenderSize,
    RendererConfig, UniformKind, UniformValue,
};
pub use window::WindowRuntime;
