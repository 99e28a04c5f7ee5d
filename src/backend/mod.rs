// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, plain functions over raw handles.
// Everything that can fail returns anyhow::Result; nothing panics.

pub mod barrier;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod image;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use buffer::{Buffer, GeometryBuffer};
pub use context::VulkanContext;
pub use device::{ContextFeatures, DeviceDesc, VulkanDevice};
pub use self::image::{VulkanImage, VulkanTexture};
pub use render_pass::{RenderPass, RenderPassCreateInfo, RenderPassFlow};
pub use surface::Surface;
pub use swapchain::Swapchain;
