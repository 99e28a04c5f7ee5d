// Staging uploads and downloads for images
//
// Every upload goes through a host-visible staging buffer, gets recorded
// into a single one-shot command buffer (transition, copy, transition) and
// waits for the graphics queue before the staging buffer is released.

use anyhow::{Context, Result};
use ash::vk;
use image::{imageops, RgbaImage};
use std::path::Path;

use super::barrier::{self, SubresourceSpan};
use super::buffer::Buffer;
use super::image::{self as img, ImageDesc, VulkanImage};
use super::VulkanDevice;

/// Format used for textures decoded from disk
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Usage for every texture created from data. TRANSFER_SRC keeps
/// `download_image_data` usable on them.
pub fn texture_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC
}

// =============================================================================
// COPY REGIONS
// =============================================================================

/// Colour-aspect copy of one mip level
pub fn image_copy_region(
    buffer_offset: vk::DeviceSize,
    mip_level: u32,
    extent: vk::Extent3D,
    layer_count: u32,
) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: extent,
    }
}

/// One region per level, packed back to back: level i starts where level
/// i - 1 (all of its layers) ends.
pub fn mip_copy_regions(
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    layer_count: u32,
    mip_levels: u32,
) -> Vec<vk::BufferImageCopy> {
    let mut offset: vk::DeviceSize = 0;

    img::mip_extents(width, height, mip_levels)
        .enumerate()
        .map(|(level, (w, h))| {
            let region = image_copy_region(
                offset,
                level as u32,
                vk::Extent3D { width: w, height: h, depth: 1 },
                layer_count,
            );
            offset += w as u64 * h as u64 * layer_count as u64 * bytes_per_pixel as u64;
            region
        })
        .collect()
}

fn extent_2d(width: u32, height: u32) -> vk::Extent3D {
    vk::Extent3D { width, height, depth: 1 }
}

// =============================================================================
// ONE-SHOT COPIES
// =============================================================================

pub fn cmd_copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    regions: &[vk::BufferImageCopy],
) {
    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
    }
}

/// Copy tightly packed layers into mip 0. The image must be in TRANSFER_DST_OPTIMAL.
pub fn copy_buffer_to_image(
    device: &VulkanDevice,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
    layer_count: u32,
) -> Result<()> {
    let region = image_copy_region(0, 0, extent_2d(width, height), layer_count);
    device.execute_single_time(|cmd| {
        cmd_copy_buffer_to_image(&device.device, cmd, buffer, image, &[region]);
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
pub fn copy_mip_buffer_to_image(
    device: &VulkanDevice,
    buffer: vk::Buffer,
    image: vk::Image,
    mip_levels: u32,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    layer_count: u32,
) -> Result<()> {
    let regions = mip_copy_regions(width, height, bytes_per_pixel, layer_count, mip_levels);
    device.execute_single_time(|cmd| {
        cmd_copy_buffer_to_image(&device.device, cmd, buffer, image, &regions);
        Ok(())
    })
}

pub fn copy_buffer_to_volume(
    device: &VulkanDevice,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
    depth: u32,
) -> Result<()> {
    let region = image_copy_region(0, 0, vk::Extent3D { width, height, depth }, 1);
    device.execute_single_time(|cmd| {
        cmd_copy_buffer_to_image(&device.device, cmd, buffer, image, &[region]);
        Ok(())
    })
}

/// Copy mip 0 out of an image in TRANSFER_SRC_OPTIMAL
pub fn copy_image_to_buffer(
    device: &VulkanDevice,
    image: vk::Image,
    buffer: vk::Buffer,
    width: u32,
    height: u32,
    layer_count: u32,
) -> Result<()> {
    let region = image_copy_region(0, 0, extent_2d(width, height), layer_count);
    device.execute_single_time(|cmd| {
        unsafe {
            device.device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &[region],
            );
        }
        Ok(())
    })
}

// =============================================================================
// STAGED UPLOAD / DOWNLOAD
// =============================================================================

/// Bytes in mip 0 across every layer (and every slice for volumes)
pub fn level0_size(image: &VulkanImage) -> Result<vk::DeviceSize> {
    let bpp = img::texel_size(image.format)?;
    Ok(image.extent.width as u64
        * image.extent.height as u64
        * image.extent.depth as u64
        * bpp as u64
        * image.layer_count as u64)
}

fn check_len(expected: vk::DeviceSize, actual: usize, what: &str) -> Result<()> {
    if actual as vk::DeviceSize != expected {
        anyhow::bail!(
            "{} holds {} bytes but the image needs exactly {}",
            what,
            actual,
            expected
        );
    }
    Ok(())
}

fn host_staging(device: &VulkanDevice, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Buffer> {
    Buffer::new(
        device,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
    .context("Failed to create staging buffer")
}

/// Layout changes recorded around one copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub before: Option<(vk::ImageLayout, vk::ImageLayout)>,
    pub after: Option<(vk::ImageLayout, vk::ImageLayout)>,
    /// Layout the image is tracked in once the submission completes
    pub final_layout: vk::ImageLayout,
}

impl TransferPlan {
    fn validated(self) -> Result<Self> {
        for (old, new) in self.before.into_iter().chain(self.after) {
            barrier::transition_masks(old, new)?;
        }
        Ok(self)
    }
}

/// Source layout to TRANSFER_DST (skipped if already there), copy, then
/// SHADER_READ_ONLY.
pub fn upload_plan(source: vk::ImageLayout) -> Result<TransferPlan> {
    use ash::vk::ImageLayout as L;

    TransferPlan {
        before: (source != L::TRANSFER_DST_OPTIMAL).then_some((source, L::TRANSFER_DST_OPTIMAL)),
        after: Some((L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)),
        final_layout: L::SHADER_READ_ONLY_OPTIMAL,
    }
    .validated()
    .with_context(|| format!("Cannot upload into an image in {:?}", source))
}

/// Source layout to TRANSFER_SRC and back around the copy. Images already in
/// TRANSFER_SRC are copied as they are.
pub fn download_plan(source: vk::ImageLayout) -> Result<TransferPlan> {
    use ash::vk::ImageLayout as L;

    if source == L::UNDEFINED {
        anyhow::bail!("Cannot read back an image whose contents are undefined");
    }

    let round_trip = source != L::TRANSFER_SRC_OPTIMAL;
    TransferPlan {
        before: round_trip.then_some((source, L::TRANSFER_SRC_OPTIMAL)),
        after: round_trip.then_some((L::TRANSFER_SRC_OPTIMAL, source)),
        final_layout: source,
    }
    .validated()
    .with_context(|| format!("Cannot read back an image in {:?}", source))
}

fn cmd_plan_step(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    step: Option<(vk::ImageLayout, vk::ImageLayout)>,
    span: SubresourceSpan,
) -> Result<()> {
    match step {
        Some((old, new)) => barrier::cmd_transition_image_layout(device, cmd, image, format, old, new, span),
        None => Ok(()),
    }
}

/// Stage `data`, record transition + copy + transition into one submission,
/// and leave every level of `image` in SHADER_READ_ONLY_OPTIMAL.
fn upload_staged(
    device: &VulkanDevice,
    image: &mut VulkanImage,
    data: &[u8],
    regions: &[vk::BufferImageCopy],
) -> Result<()> {
    let plan = upload_plan(image.layout)?;
    let staging = host_staging(device, data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;

    let span = image.full_span();
    let (handle, format) = (image.image, image.format);

    let result = staging.upload(device, 0, data).and_then(|_| {
        device.execute_single_time(|cmd| {
            cmd_plan_step(&device.device, cmd, handle, format, plan.before, span)?;
            cmd_copy_buffer_to_image(&device.device, cmd, staging.handle, handle, regions);
            cmd_plan_step(&device.device, cmd, handle, format, plan.after, span)
        })
    });

    staging.destroy(&device.device);
    result?;

    image.layout = plan.final_layout;
    log::debug!(
        "Uploaded {} bytes into {}x{} {:?} image",
        data.len(),
        image.extent.width,
        image.extent.height,
        format
    );
    Ok(())
}

/// Replace mip 0 of every layer with `data`, starting from the tracked layout
pub fn update_texture_image(device: &VulkanDevice, image: &mut VulkanImage, data: &[u8]) -> Result<()> {
    if image.extent.depth != 1 {
        anyhow::bail!("update_texture_image called on a volume, use update_texture_volume");
    }
    check_len(level0_size(image)?, data.len(), "Texture data")?;

    let region = image_copy_region(
        0,
        0,
        extent_2d(image.extent.width, image.extent.height),
        image.layer_count,
    );
    upload_staged(device, image, data, &[region])
}

pub fn update_texture_volume(device: &VulkanDevice, image: &mut VulkanImage, data: &[u8]) -> Result<()> {
    check_len(level0_size(image)?, data.len(), "Volume data")?;

    let region = image_copy_region(0, 0, image.extent, 1);
    upload_staged(device, image, data, &[region])
}

/// Read mip 0 of every layer back into `out`. The image returns to the layout
/// it was in before the call.
pub fn download_image_data(device: &VulkanDevice, image: &mut VulkanImage, out: &mut [u8]) -> Result<()> {
    let plan = download_plan(image.layout)?;
    let size = level0_size(image)?;
    check_len(size, out.len(), "Output buffer")?;

    let staging = host_staging(device, size, vk::BufferUsageFlags::TRANSFER_DST)?;

    let span = SubresourceSpan::new(image.layer_count, 1);
    let (handle, format) = (image.image, image.format);
    let region = image_copy_region(0, 0, image.extent, image.layer_count);

    let result = device
        .execute_single_time(|cmd| {
            cmd_plan_step(&device.device, cmd, handle, format, plan.before, span)?;
            unsafe {
                device.device.cmd_copy_image_to_buffer(
                    cmd,
                    handle,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    staging.handle,
                    &[region],
                );
            }
            cmd_plan_step(&device.device, cmd, handle, format, plan.after, span)
        })
        .and_then(|_| staging.download(device, 0, out));

    staging.destroy(&device.device);
    result
}

// =============================================================================
// TEXTURE CREATION
// =============================================================================

/// Create a sampled image and upload mip 0. Further levels are allocated and
/// transitioned but left for the caller to fill (e.g. with blits).
pub fn create_texture_image_from_data(
    device: &VulkanDevice,
    data: &[u8],
    width: u32,
    height: u32,
    format: vk::Format,
    create_flags: vk::ImageCreateFlags,
    mip_levels: u32,
) -> Result<VulkanImage> {
    let mut image = img::create_image(
        device,
        &ImageDesc::new_2d(width, height, format, texture_usage())
            .create_flags(create_flags)
            .mip_levels(mip_levels),
    )?;

    if let Err(e) = update_texture_image(device, &mut image, data) {
        image.destroy(&device.device);
        return Err(e);
    }
    Ok(image)
}

/// Create a sampled image from a packed mip chain (level 0 first, every layer
/// of a level before the next level).
#[allow(clippy::too_many_arguments)]
pub fn create_mip_texture_image_from_data(
    device: &VulkanDevice,
    mip_data: &[u8],
    mip_levels: u32,
    width: u32,
    height: u32,
    format: vk::Format,
    create_flags: vk::ImageCreateFlags,
) -> Result<VulkanImage> {
    let bpp = img::texel_size(format)?;

    let mut image = img::create_image(
        device,
        &ImageDesc::new_2d(width, height, format, texture_usage())
        .create_flags(create_flags)
        .mip_levels(mip_levels),
    )?;

    let expected = img::mip_chain_size(width, height, bpp, image.layer_count, image.mip_levels);
    let regions = mip_copy_regions(width, height, bpp, image.layer_count, image.mip_levels);

    let uploaded = check_len(expected, mip_data.len(), "Mip chain")
        .and_then(|_| upload_staged(device, &mut image, mip_data, &regions));

    if let Err(e) = uploaded {
        image.destroy(&device.device);
        return Err(e);
    }
    Ok(image)
}

pub fn create_texture_volume_from_data(
    device: &VulkanDevice,
    data: &[u8],
    width: u32,
    height: u32,
    depth: u32,
    format: vk::Format,
) -> Result<VulkanImage> {
    let mut volume = img::create_volume(device, width, height, depth, format, texture_usage())?;

    if let Err(e) = update_texture_volume(device, &mut volume, data) {
        volume.destroy(&device.device);
        return Err(e);
    }
    Ok(volume)
}

/// Decode an image file to RGBA8
pub fn load_rgba8(path: &Path) -> Result<RgbaImage> {
    let decoded = image::open(path)
        .with_context(|| format!("Failed to load texture {}", path.display()))?;
    Ok(decoded.to_rgba8())
}

/// Level 0 followed by each successively halved level, triangle filtered
pub fn generate_mip_chain(base: &RgbaImage, mip_levels: u32) -> Vec<u8> {
    let (width, height) = base.dimensions();
    let mut bytes = base.as_raw().clone();
    let mut level = base.clone();

    for (w, h) in img::mip_extents(width, height, mip_levels).skip(1) {
        level = imageops::resize(&level, w, h, imageops::FilterType::Triangle);
        bytes.extend_from_slice(level.as_raw());
    }
    bytes
}

/// Load a texture with a full mip chain and a default 2D view
pub fn create_texture_image(device: &VulkanDevice, path: &Path) -> Result<VulkanImage> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("Failed to read texture header {}", path.display()))?;
    create_mip_texture_image(device, path, img::mip_level_count(width, height))
}

/// Load a texture and build `mip_levels` levels on the CPU
pub fn create_mip_texture_image(device: &VulkanDevice, path: &Path, mip_levels: u32) -> Result<VulkanImage> {
    let base = load_rgba8(path)?;
    let (width, height) = base.dimensions();
    let mip_levels = mip_levels.clamp(1, img::mip_level_count(width, height));
    let chain = generate_mip_chain(&base, mip_levels);

    let mut texture = create_mip_texture_image_from_data(
        device,
        &chain,
        mip_levels,
        width,
        height,
        TEXTURE_FORMAT,
        vk::ImageCreateFlags::empty(),
    )?;

    if let Err(e) = texture.create_view(device, vk::ImageAspectFlags::COLOR, vk::ImageViewType::TYPE_2D) {
        texture.destroy(&device.device);
        return Err(e);
    }

    device.set_object_name(texture.image, &path.display().to_string());
    log::info!(
        "Loaded texture {} ({}x{}, {} mips)",
        path.display(),
        width,
        height,
        mip_levels
    );
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn mip_regions_advance_by_previous_level() {
        let regions = mip_copy_regions(8, 8, 4, 1, 4);
        let offsets: Vec<_> = regions.iter().map(|r| r.buffer_offset).collect();
        assert_eq!(offsets, vec![0, 256, 320, 336]);

        let sizes: Vec<_> = regions
            .iter()
            .map(|r| (r.image_extent.width, r.image_extent.height, r.image_subresource.mip_level))
            .collect();
        assert_eq!(sizes, vec![(8, 8, 0), (4, 4, 1), (2, 2, 2), (1, 1, 3)]);
    }

    #[test]
    fn mip_regions_account_for_layers() {
        let regions = mip_copy_regions(4, 4, 1, 6, 2);
        assert_eq!(regions[1].buffer_offset, 96);
        assert!(regions.iter().all(|r| r.image_subresource.layer_count == 6));
        assert!(regions
            .iter()
            .all(|r| r.image_subresource.aspect_mask == vk::ImageAspectFlags::COLOR));
    }

    #[test]
    fn last_region_ends_at_chain_size() {
        let (w, h, bpp, layers, mips) = (16, 4, 8, 2, 5);
        let regions = mip_copy_regions(w, h, bpp, layers, mips);
        let last = regions.last().unwrap();
        let end = last.buffer_offset
            + (last.image_extent.width * last.image_extent.height * bpp * layers) as u64;
        assert_eq!(end, img::mip_chain_size(w, h, bpp, layers, mips));
    }

    #[test]
    fn level0_size_covers_layers_and_slices() {
        let mut image = VulkanImage {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format: vk::Format::R16G16B16A16_SFLOAT,
            extent: vk::Extent3D { width: 4, height: 2, depth: 1 },
            mip_levels: 1,
            layer_count: 6,
            layout: vk::ImageLayout::UNDEFINED,
        };
        assert_eq!(level0_size(&image).unwrap(), 4 * 2 * 8 * 6);

        image.layer_count = 1;
        image.extent.depth = 3;
        image.format = vk::Format::R8_UNORM;
        assert_eq!(level0_size(&image).unwrap(), 24);

        image.format = vk::Format::D32_SFLOAT;
        assert!(level0_size(&image).is_err());
    }

    #[test]
    fn upload_plan_ends_sampled_from_every_supported_source() {
        use ash::vk::ImageLayout as L;

        for source in [
            L::UNDEFINED,
            L::SHADER_READ_ONLY_OPTIMAL,
            L::TRANSFER_SRC_OPTIMAL,
            L::COLOR_ATTACHMENT_OPTIMAL,
        ] {
            let plan = upload_plan(source).unwrap();
            assert_eq!(plan.before, Some((source, L::TRANSFER_DST_OPTIMAL)));
            assert_eq!(plan.after, Some((L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)));
            assert_eq!(plan.final_layout, L::SHADER_READ_ONLY_OPTIMAL);
        }
    }

    #[test]
    fn upload_into_transfer_dst_skips_the_first_barrier() {
        use ash::vk::ImageLayout as L;

        let plan = upload_plan(L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(plan.before, None);
        assert_eq!(plan.final_layout, L::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn download_plan_returns_to_the_source_layout() {
        use ash::vk::ImageLayout as L;

        for source in [
            L::SHADER_READ_ONLY_OPTIMAL,
            L::TRANSFER_DST_OPTIMAL,
            L::COLOR_ATTACHMENT_OPTIMAL,
        ] {
            let plan = download_plan(source).unwrap();
            assert_eq!(plan.before, Some((source, L::TRANSFER_SRC_OPTIMAL)));
            assert_eq!(plan.after, Some((L::TRANSFER_SRC_OPTIMAL, source)));
            assert_eq!(plan.final_layout, source);
        }

        let plan = download_plan(L::TRANSFER_SRC_OPTIMAL).unwrap();
        assert_eq!((plan.before, plan.after), (None, None));
        assert_eq!(plan.final_layout, L::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn unsupported_sources_are_rejected_before_staging() {
        use ash::vk::ImageLayout as L;

        assert!(upload_plan(L::GENERAL).is_err());
        assert!(download_plan(L::GENERAL).is_err());
        assert!(download_plan(L::PRESENT_SRC_KHR).is_err());

        let err = download_plan(L::UNDEFINED).unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }

    #[test]
    fn textures_can_be_read_back() {
        let usage = texture_usage();
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(check_len(64, 64, "data").is_ok());
        assert!(check_len(64, 63, "data").is_err());
        assert!(check_len(64, 65, "data").is_err());
    }

    #[test]
    fn cpu_mip_chain_matches_packed_size() {
        let base = RgbaImage::from_pixel(8, 4, Rgba([255, 0, 0, 255]));
        let mips = img::mip_level_count(8, 4);
        let chain = generate_mip_chain(&base, mips);

        assert_eq!(mips, 4);
        assert_eq!(chain.len() as u64, img::mip_chain_size(8, 4, 4, 1, mips));
        // Filtering a flat colour keeps the colour
        assert_eq!(&chain[chain.len() - 4..], &[255, 0, 0, 255]);
    }
}
