//! Frame capture
//!
//! The render capability the recorder pulls frames from.

pub mod traits;

pub use traits::{CapturedImage, PixelFormat, RenderTarget, Renderer};
