// Synchronization primitives
//
// Binary semaphores and fences for frame pacing, timeline semaphores for
// cross-queue (graphics/compute) ordering.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let image_available = create_semaphore(device)?;
        let render_finished = match create_semaphore(device) {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.device.destroy_semaphore(image_available, None) };
                return Err(e);
            }
        };

        // Signalled so the first wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        match unsafe { device.device.create_fence(&fence_info, None) } {
            Ok(in_flight_fence) => Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            }),
            Err(e) => {
                unsafe {
                    device.device.destroy_semaphore(image_available, None);
                    device.device.destroy_semaphore(render_finished, None);
                }
                Err(e).context("Failed to create fence")
            }
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

pub fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.device.create_semaphore(&semaphore_info, None) }
        .context("Failed to create semaphore")
}

pub fn create_timeline_semaphore(device: &VulkanDevice, initial_value: u64) -> Result<vk::Semaphore> {
    let mut type_info = timeline_type_info(initial_value);
    let semaphore_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

    unsafe { device.device.create_semaphore(&semaphore_info, None) }
        .context("Failed to create timeline semaphore")
}

fn timeline_type_info(initial_value: u64) -> vk::SemaphoreTypeCreateInfo {
    vk::SemaphoreTypeCreateInfo::builder()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value)
        .build()
}

/// Block until the timeline reaches `value`
pub fn wait_timeline(device: &VulkanDevice, semaphore: vk::Semaphore, value: u64, timeout: u64) -> Result<()> {
    let semaphores = [semaphore];
    let values = [value];
    let wait_info = vk::SemaphoreWaitInfo::builder()
        .semaphores(&semaphores)
        .values(&values);

    unsafe { device.device.wait_semaphores(&wait_info, timeout) }
        .context("Failed waiting on timeline semaphore")
}

pub fn timeline_value(device: &VulkanDevice, semaphore: vk::Semaphore) -> Result<u64> {
    unsafe { device.device.get_semaphore_counter_value(semaphore) }
        .context("Failed to read timeline semaphore")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_info_carries_initial_value() {
        let info = timeline_type_info(7);
        assert_eq!(info.semaphore_type, vk::SemaphoreType::TIMELINE);
        assert_eq!(info.initial_value, 7);
    }
}
