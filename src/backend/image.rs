// Images, views and samplers
//
// 2D images (optionally cube-compatible with 6 layers), 3D volumes, depth
// buffers, offscreen render targets, plus the format / mip-chain arithmetic
// the staging code depends on.

use anyhow::{Context, Result};
use ash::vk;

use super::barrier::{self, SubresourceSpan};
use super::VulkanDevice;

/// An image, its memory, an optional default view and the layout it was
/// last transitioned to.
#[derive(Debug, Clone, Copy)]
pub struct VulkanImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub layer_count: u32,
    pub layout: vk::ImageLayout,
}

impl VulkanImage {
    /// Span over every mip and layer
    pub fn full_span(&self) -> SubresourceSpan {
        SubresourceSpan::new(self.layer_count, self.mip_levels)
    }

    /// Create (or replace) the default view
    pub fn create_view(
        &mut self,
        device: &VulkanDevice,
        aspect: vk::ImageAspectFlags,
        view_type: vk::ImageViewType,
    ) -> Result<vk::ImageView> {
        if self.view != vk::ImageView::null() {
            unsafe { device.device.destroy_image_view(self.view, None) };
        }
        self.view = create_image_view(
            device,
            self.image,
            self.format,
            aspect,
            view_type,
            0,
            self.layer_count,
            self.mip_levels,
        )?;
        Ok(self.view)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// A sampled image
#[derive(Debug, Clone, Copy)]
pub struct VulkanTexture {
    pub image: VulkanImage,
    pub sampler: vk::Sampler,
}

impl VulkanTexture {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_sampler(self.sampler, None) };
        self.image.destroy(device);
    }
}

/// Parameters for `create_image`
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_flags: vk::MemoryPropertyFlags,
    pub create_flags: vk::ImageCreateFlags,
    pub mip_levels: u32,
}

impl ImageDesc {
    /// Device-local, optimally tiled 2D image with one mip
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            width,
            height,
            depth: 1,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            create_flags: vk::ImageCreateFlags::empty(),
            mip_levels: 1,
        }
    }

    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_3D,
            depth,
            ..Self::new_2d(width, height, format, usage)
        }
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn create_flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.create_flags = flags;
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn memory_flags(mut self, flags: vk::MemoryPropertyFlags) -> Self {
        self.memory_flags = flags;
        self
    }

    pub fn is_volume(&self) -> bool {
        self.image_type == vk::ImageType::TYPE_3D
    }

    /// Requested levels clamped to `1..=mip_level_count`; volumes get one
    pub fn effective_mip_levels(&self) -> u32 {
        if self.is_volume() {
            1
        } else {
            self.mip_levels.clamp(1, mip_level_count(self.width, self.height))
        }
    }

    /// Cube-compatible 2D images get six layers; volumes always have one
    pub fn array_layers(&self) -> u32 {
        if !self.is_volume() && self.create_flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) {
            6
        } else {
            1
        }
    }
}

pub fn create_image(device: &VulkanDevice, desc: &ImageDesc) -> Result<VulkanImage> {
    if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
        anyhow::bail!(
            "Cannot create an image of size {}x{}x{}",
            desc.width,
            desc.height,
            desc.depth
        );
    }

    let mip_levels = desc.effective_mip_levels();
    let layer_count = desc.array_layers();
    let extent = vk::Extent3D {
        width: desc.width,
        height: desc.height,
        depth: desc.depth,
    };

    let image_info = vk::ImageCreateInfo::builder()
        .flags(desc.create_flags)
        .image_type(desc.image_type)
        .format(desc.format)
        .extent(extent)
        .mip_levels(mip_levels)
        .array_layers(layer_count)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(desc.tiling)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.device.create_image(&image_info, None) }
        .context("Failed to create image")?;

    let mem_requirements = unsafe { device.device.get_image_memory_requirements(image) };

    let memory = device
        .memory_type_index(mem_requirements.memory_type_bits, desc.memory_flags)
        .and_then(|memory_type_index| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(mem_requirements.size)
                .memory_type_index(memory_type_index);
            unsafe { device.device.allocate_memory(&alloc_info, None) }
                .context("Failed to allocate image memory")
        });

    let memory = match memory {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            return Err(e);
        }
    };

    if let Err(e) = unsafe { device.device.bind_image_memory(image, memory, 0) } {
        unsafe {
            device.device.destroy_image(image, None);
            device.device.free_memory(memory, None);
        }
        return Err(e).context("Failed to bind image memory");
    }

    Ok(VulkanImage {
        image,
        memory,
        view: vk::ImageView::null(),
        format: desc.format,
        extent,
        mip_levels,
        layer_count,
        layout: vk::ImageLayout::UNDEFINED,
    })
}

/// 3D image with a single mip and layer
pub fn create_volume(
    device: &VulkanDevice,
    width: u32,
    height: u32,
    depth: u32,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<VulkanImage> {
    create_image(device, &ImageDesc::new_3d(width, height, depth, format, usage))
}

#[allow(clippy::too_many_arguments)]
pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    view_type: vk::ImageViewType,
    base_layer: u32,
    layer_count: u32,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(view_type)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: base_layer,
            layer_count,
        });

    unsafe { device.device.create_image_view(&view_info, None) }
        .context("Failed to create image view")
}

/// Depth buffer in the best supported depth format, ready to be attached
pub fn create_depth_resources(device: &VulkanDevice, width: u32, height: u32) -> Result<VulkanImage> {
    let format = device.find_depth_format()?;

    let mut depth = create_image(
        device,
        &ImageDesc::new_2d(width, height, format, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
    )?;

    let ready = depth
        .create_view(device, vk::ImageAspectFlags::DEPTH, vk::ImageViewType::TYPE_2D)
        .and_then(|_| {
            barrier::transition_image_layout(
                device,
                depth.image,
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                SubresourceSpan::single(),
            )
        });

    if let Err(e) = ready {
        depth.destroy(&device.device);
        return Err(e);
    }

    depth.layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
    device.set_object_name(depth.image, "depth buffer");
    log::debug!("Created {}x{} depth buffer ({:?})", width, height, format);
    Ok(depth)
}

/// Render target that can also be sampled, stored to, and copied in both directions
pub fn create_offscreen_image(
    device: &VulkanDevice,
    width: u32,
    height: u32,
    format: vk::Format,
    create_flags: vk::ImageCreateFlags,
    mip_levels: u32,
) -> Result<VulkanImage> {
    let usage = vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::STORAGE;

    create_image(
        device,
        &ImageDesc::new_2d(width, height, format, usage)
            .create_flags(create_flags)
            .mip_levels(mip_levels),
    )
}

// =============================================================================
// SAMPLERS
// =============================================================================

pub fn create_texture_sampler(
    device: &VulkanDevice,
    max_lod: f32,
    max_anisotropy: f32,
    min_filter: vk::Filter,
    mag_filter: vk::Filter,
    address_mode: vk::SamplerAddressMode,
) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(mag_filter)
        .min_filter(min_filter)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .mip_lod_bias(0.0)
        .anisotropy_enable(false)
        .max_anisotropy(max_anisotropy)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(max_lod)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create texture sampler")
}

/// Sampler for reading depth maps (shadow maps, SSAO)
pub fn create_depth_sampler(device: &VulkanDevice) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .mip_lod_bias(0.0)
        .max_anisotropy(1.0)
        .min_lod(0.0)
        .max_lod(1.0)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create depth sampler")
}

// =============================================================================
// FORMAT / MIP MATH
// =============================================================================

/// Texel size for the formats the staging code knows how to size
pub fn bytes_per_tex_format(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8_SINT | vk::Format::R8_UNORM => Some(1),
        vk::Format::R16_SFLOAT => Some(2),
        vk::Format::R16G16_SFLOAT
        | vk::Format::R16G16_SNORM
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Like `bytes_per_tex_format` but an error for unknown formats
pub fn texel_size(format: vk::Format) -> Result<u32> {
    bytes_per_tex_format(format)
        .with_context(|| format!("No texel size known for format {:?}", format))
}

/// Full mip chain length: floor(log2(max(w, h))) + 1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// Dimensions of each mip level, never below 1x1
pub fn mip_extents(width: u32, height: u32, mip_levels: u32) -> impl Iterator<Item = (u32, u32)> {
    (0..mip_levels).map(move |level| ((width >> level).max(1), (height >> level).max(1)))
}

/// Bytes needed to hold every level of every layer, tightly packed
pub fn mip_chain_size(width: u32, height: u32, bytes_per_pixel: u32, layers: u32, mip_levels: u32) -> u64 {
    mip_extents(width, height, mip_levels)
        .map(|(w, h)| w as u64 * h as u64 * bytes_per_pixel as u64 * layers as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_sizes() {
        assert_eq!(bytes_per_tex_format(vk::Format::R8_UNORM), Some(1));
        assert_eq!(bytes_per_tex_format(vk::Format::R8_SINT), Some(1));
        assert_eq!(bytes_per_tex_format(vk::Format::R16_SFLOAT), Some(2));
        assert_eq!(bytes_per_tex_format(vk::Format::R16G16_SNORM), Some(4));
        assert_eq!(bytes_per_tex_format(vk::Format::B8G8R8A8_UNORM), Some(4));
        assert_eq!(bytes_per_tex_format(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(bytes_per_tex_format(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(bytes_per_tex_format(vk::Format::BC7_UNORM_BLOCK), None);
        assert!(texel_size(vk::Format::D32_SFLOAT).is_err());
    }

    #[test]
    fn mip_counts() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(512, 300), 10);
        assert_eq!(mip_level_count(300, 1), 9);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn requested_mips_are_clamped_to_the_chain() {
        let usage = vk::ImageUsageFlags::SAMPLED;
        let desc = ImageDesc::new_2d(4, 4, vk::Format::R8G8B8A8_UNORM, usage);

        assert_eq!(desc.mip_levels(10).effective_mip_levels(), 3);
        assert_eq!(desc.mip_levels(2).effective_mip_levels(), 2);
        assert_eq!(desc.mip_levels(0).effective_mip_levels(), 1);

        let volume = ImageDesc::new_3d(4, 4, 4, vk::Format::R8_UNORM, usage).mip_levels(3);
        assert_eq!(volume.effective_mip_levels(), 1);
    }

    #[test]
    fn mip_extents_clamp_to_one() {
        let extents: Vec<_> = mip_extents(8, 2, 4).collect();
        assert_eq!(extents, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn mip_chain_size_sums_every_level() {
        // 4x4 RGBA8: 64 + 16 + 4
        assert_eq!(mip_chain_size(4, 4, 4, 1, 3), 84);
        // Six cube faces
        assert_eq!(mip_chain_size(4, 4, 4, 6, 1), 384);
    }

    #[test]
    fn cube_flag_means_six_layers() {
        let usage = vk::ImageUsageFlags::SAMPLED;
        let plain = ImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, usage);
        assert_eq!(plain.array_layers(), 1);

        let cube = plain.create_flags(vk::ImageCreateFlags::CUBE_COMPATIBLE);
        assert_eq!(cube.array_layers(), 6);

        let volume = ImageDesc::new_3d(16, 16, 16, vk::Format::R8_UNORM, usage);
        assert!(volume.is_volume());
        assert_eq!(volume.array_layers(), 1);
    }

    #[test]
    fn full_span_covers_all_levels_and_layers() {
        let image = VulkanImage {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D { width: 64, height: 64, depth: 1 },
            mip_levels: 7,
            layer_count: 6,
            layout: vk::ImageLayout::UNDEFINED,
        };
        let span = image.full_span();
        assert_eq!((span.mip_levels, span.layer_count), (7, 6));
        assert_eq!((span.base_mip, span.base_layer), (0, 0));
    }
}
