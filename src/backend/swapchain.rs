// Swapchain - Window presentation
//
// The surface-dependent choices (format, present mode, image count, extent,
// usage) are plain functions over the queried support so they can be tested
// without a window.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::image::create_image_view;
use super::surface::Surface;
use super::VulkanDevice;

/// What the surface supports on the selected GPU
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(device: &VulkanDevice, surface: &Surface) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(device.physical_device, surface.handle)
                    .context("Failed to query surface capabilities")?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(device.physical_device, surface.handle)
                    .context("Failed to query surface formats")?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(device.physical_device, surface.handle)
                    .context("Failed to query present modes")?,
            })
        }
    }
}

/// sRGB BGRA8 when offered, otherwise whatever comes first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .context("Surface reports no formats")
}

/// `preferred` if available, then MAILBOX, then FIFO (always supported)
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, capped by the maximum when there is one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Screenshots copy out of the swapchain image, so they need TRANSFER_SRC
pub fn image_usage(support_screenshots: bool) -> vk::ImageUsageFlags {
    let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::SAMPLED;
    if support_screenshots {
        usage | vk::ImageUsageFlags::TRANSFER_SRC
    } else {
        usage
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    preferred_present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        Self::create(
            device,
            surface,
            width,
            height,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )
    }

    fn create(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let support = SwapchainSupport::query(&device, surface)?;
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!("Present mode: {:?}", present_mode);

        let loader = khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage(device.features.support_screenshots))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // From here on Drop cleans up whatever got created
        let mut swapchain = Self {
            handle,
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
            preferred_present_mode,
            device,
        };

        swapchain.images = unsafe { swapchain.loader.get_swapchain_images(handle) }
            .context("Failed to get swapchain images")?;

        for &image in &swapchain.images {
            let view = create_image_view(
                &swapchain.device,
                image,
                swapchain.format,
                vk::ImageAspectFlags::COLOR,
                vk::ImageViewType::TYPE_2D,
                0,
                1,
                1,
            )?;
            swapchain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Rebuild for a new window size, retiring the current swapchain
    pub fn recreate(&mut self, surface: &Surface, width: u32, height: u32) -> Result<()> {
        let replacement = Self::create(
            self.device.clone(),
            surface,
            width,
            height,
            self.preferred_present_mode,
            self.handle,
        )?;
        // The old swapchain is dropped (and destroyed) here
        *self = replacement;
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image. `None` means the swapchain is out of date and
    /// must be recreated; otherwise the flag reports a suboptimal swapchain.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<Option<(u32, bool)>> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present `image_index`. Returns true when the swapchain needs recreating.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<bool> {
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2160 },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(
            choose_surface_format(&formats[..1]).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_fallbacks() {
        use ash::vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], P::IMMEDIATE), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], P::IMMEDIATE), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO], P::FIFO_RELAXED), P::FIFO);
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(choose_image_count(&caps(2, 0, UNDEFINED_EXTENT)), 3);
        assert_eq!(choose_image_count(&caps(2, 8, UNDEFINED_EXTENT)), 3);
        assert_eq!(choose_image_count(&caps(3, 3, UNDEFINED_EXTENT)), 3);
    }

    #[test]
    fn extent_uses_current_unless_undefined() {
        let fixed = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&caps(2, 0, fixed), 1920, 1080), fixed);

        let clamped = choose_extent(&caps(2, 0, UNDEFINED_EXTENT), 8000, 10);
        assert_eq!(clamped, vk::Extent2D { width: 4096, height: 64 });
    }

    #[test]
    fn screenshots_add_transfer_src() {
        assert!(!image_usage(false).contains(vk::ImageUsageFlags::TRANSFER_SRC));
        let usage = image_usage(true);
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED));
    }
}
