//! Frame loop and scene renderer.
//!
//! This crate drives a [`frameloop_rhi::backend::GpuBackend`]:
//! - [`frame_loop::FrameLoop`] runs the per-frame acquire, throttle, record,
//!   submit and present sequence over a ring of frame slots
//! - [`renderer::Renderer`] loads a scene's GPU objects, feeds the frame loop
//!   each tick and tears everything down again

pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod renderer;
pub mod uniform;

pub use error::{LoadStage, RendererError, RendererResult};
pub use frame::{FrameSlot, SlotState};
pub use frame_loop::{FrameLoop, FrameRecipe, FrameReport, TickOutcome};
pub use renderer::Renderer;
pub use uniform::UniformPayload;
