//! Platform layer: winit window and keyboard state.
//!
//! This crate provides:
//! - Window creation and resize tracking via winit
//! - Raw window handles for Vulkan surface creation
//! - Keyboard input state

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::Window;

// Re-export winit types that users might need
pub use winit::application::ApplicationHandler;
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
pub use winit::window::WindowId;
