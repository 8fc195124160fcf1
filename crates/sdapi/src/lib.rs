//! Stable Diffusion web UI REST client.
//!
//! Provides typed request/response structures and an HTTP wrapper for
//! the `/sdapi/v1` endpoints a worker exposes: model options (used as
//! the liveness probe), installed extensions, text-to-image generation
//! and interruption.

pub mod api;
pub mod messages;

pub use api::{SdApi, SdApiError};
pub use messages::{GenerationParams, OptionsResponse, Txt2ImgRequest, Txt2ImgResponse};
