// VulkanContext - everything a windowed renderer needs, in creation order
//
// device (instance, debug messenger, queues) -> surface -> swapchain ->
// per-image command buffers -> frame sync. Fields are declared in reverse
// creation order so the implicit drops run in the right sequence.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::commands::PerImageCommands;
use super::device::{DeviceDesc, VulkanDevice};
use super::surface::{self, Surface};
use super::swapchain::Swapchain;
use super::sync::{self, FrameSync};
use crate::config::Config;

pub struct VulkanContext {
    pub frames: Vec<FrameSync>,
    /// Orders compute work against graphics work
    pub timeline: vk::Semaphore,
    pub commands: PerImageCommands,
    /// Only when compute runs on its own family
    pub compute_commands: Option<PerImageCommands>,
    pub swapchain: Swapchain,
    pub surface: Surface,
    pub device: Arc<VulkanDevice>,
}

impl VulkanContext {
    pub fn new(
        config: &Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let desc = DeviceDesc {
            app_name: &config.window.title,
            enable_validation: config.debug.validation_layers,
            surface_extensions: surface::required_extensions(display)?,
            features: config.context_features(),
        };
        let device = VulkanDevice::new(&desc)?;

        let surface = Surface::new(device.clone(), display, window)?;
        if !surface.supports_present(device.graphics_queue_family)? {
            anyhow::bail!(
                "Graphics queue family {} cannot present to this surface",
                device.graphics_queue_family
            );
        }

        let swapchain = Swapchain::new(device.clone(), &surface, width, height, config.present_mode())?;

        let mut ctx = Self {
            frames: Vec::new(),
            timeline: vk::Semaphore::null(),
            commands: PerImageCommands::new(&device, device.graphics_queue_family, swapchain.image_count())?,
            compute_commands: None,
            swapchain,
            surface,
            device,
        };

        // Partially built from here; Drop handles cleanup on error
        if ctx.device.has_separate_compute_queue() {
            ctx.compute_commands = Some(PerImageCommands::new(
                &ctx.device,
                ctx.device.compute_queue_family,
                ctx.swapchain.image_count(),
            )?);
        }
        ctx.timeline = sync::create_timeline_semaphore(&ctx.device, 0)?;
        for _ in 0..config.graphics.max_frames_in_flight.max(1) {
            let frame = FrameSync::new(&ctx.device)?;
            ctx.frames.push(frame);
        }

        log::info!(
            "Vulkan context ready: {} swapchain images, {} frames in flight",
            ctx.swapchain.image_count(),
            ctx.frames.len()
        );
        Ok(ctx)
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Rebuild the swapchain (and per-image command buffers if the image
    /// count changed) after a resize
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.wait_idle()?;
        self.swapchain
            .recreate(&self.surface, width, height)
            .context("Failed to recreate swapchain")?;

        if self.swapchain.image_count() != self.commands.len() {
            let count = self.swapchain.image_count();
            self.commands.destroy(&self.device.device);
            self.commands = PerImageCommands::new(&self.device, self.device.graphics_queue_family, count)?;

            if let Some(compute) = self.compute_commands.as_mut() {
                compute.destroy(&self.device.device);
                *compute = PerImageCommands::new(&self.device, self.device.compute_queue_family, count)?;
            }
        }
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();

        let device = &self.device.device;
        for frame in &self.frames {
            frame.destroy(device);
        }
        if self.timeline != vk::Semaphore::null() {
            unsafe { device.destroy_semaphore(self.timeline, None) };
        }
        if let Some(compute) = self.compute_commands.as_mut() {
            compute.destroy(device);
        }
        self.commands.destroy(device);
        // swapchain, surface and device follow as fields
    }
}
