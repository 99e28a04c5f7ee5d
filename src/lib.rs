// vk-toolkit - Vulkan initialization and resource helpers
//
// A thin layer over ash: device/swapchain setup, buffers and images,
// staging uploads, layout transitions, render passes and pipelines.

pub mod backend;
pub mod config;

pub use backend::{VulkanContext, VulkanDevice};
pub use config::Config;
