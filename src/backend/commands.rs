// Per-swapchain-image command buffers and compute dispatch

use anyhow::{Context, Result};
use ash::vk;

use super::device::create_command_pool;
use super::VulkanDevice;

/// One pool and one primary command buffer per swapchain image, all on the
/// same queue family. Separate pools let each image be reset independently.
pub struct PerImageCommands {
    pub queue_family: u32,
    pub pools: Vec<vk::CommandPool>,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl PerImageCommands {
    pub fn new(device: &VulkanDevice, queue_family: u32, image_count: usize) -> Result<Self> {
        let mut commands = Self {
            queue_family,
            pools: Vec::with_capacity(image_count),
            buffers: Vec::with_capacity(image_count),
        };

        for _ in 0..image_count {
            if let Err(e) = commands.push_one(&device.device) {
                commands.destroy(&device.device);
                return Err(e);
            }
        }

        log::debug!(
            "Created {} command buffers on queue family {}",
            image_count,
            queue_family
        );
        Ok(commands)
    }

    fn push_one(&mut self, device: &ash::Device) -> Result<()> {
        let pool = create_command_pool(device, self.queue_family)?;
        self.pools.push(pool);

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate per-image command buffer")?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;
        self.buffers.push(buffer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn reset(&self, device: &ash::Device, index: usize) -> Result<()> {
        let pool = *self
            .pools
            .get(index)
            .with_context(|| format!("No command pool for image {}", index))?;
        unsafe { device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
            .context("Failed to reset command pool")
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for &pool in &self.pools {
                // Frees the pool's buffers too
                device.destroy_command_pool(pool, None);
            }
        }
        self.pools.clear();
        self.buffers.clear();
    }
}

/// Begin `cmd`, let `record` fill it, end it
pub fn record_commands<F>(device: &ash::Device, cmd: vk::CommandBuffer, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let begin_info = vk::CommandBufferBeginInfo::builder();
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .context("Failed to begin command buffer")?;
    record(cmd)?;
    unsafe { device.end_command_buffer(cmd) }.context("Failed to end command buffer")
}

/// Dispatch a compute pipeline on the compute queue and wait until the
/// results are readable from the host.
pub fn execute_compute(
    device: &VulkanDevice,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
    x: u32,
    y: u32,
    z: u32,
) -> Result<()> {
    device.execute_single_time_compute(|cmd| {
        let readout = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .build();

        unsafe {
            device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline);
            device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[set],
                &[],
            );
            device.device.cmd_dispatch(cmd, x, y, z);
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[readout],
                &[],
                &[],
            );
        }
        Ok(())
    })
}
