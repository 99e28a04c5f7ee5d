// Image layout transitions and pipeline barriers
//
// Every (old layout, new layout) pair the toolkit uses maps to a fixed set of
// access masks and pipeline stages. Unknown pairs are rejected instead of
// emitting a barrier with made-up stages.

use anyhow::Result;
use ash::vk;

use super::device::has_stencil_component;
use super::image::VulkanImage;
use super::VulkanDevice;

/// Access masks and stages for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl TransitionMasks {
    const fn new(
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> Self {
        Self { src_access, dst_access, src_stage, dst_stage }
    }
}

/// Mip/layer range covered by a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceSpan {
    pub base_mip: u32,
    pub mip_levels: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceSpan {
    /// Mips `0..mip_levels` of layers `0..layer_count`
    pub const fn new(layer_count: u32, mip_levels: u32) -> Self {
        Self {
            base_mip: 0,
            mip_levels,
            base_layer: 0,
            layer_count,
        }
    }

    pub const fn single() -> Self {
        Self::new(1, 1)
    }
}

impl Default for SubresourceSpan {
    fn default() -> Self {
        Self::single()
    }
}

pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use ash::vk::AccessFlags as A;
    use ash::vk::ImageLayout as L;
    use ash::vk::PipelineStageFlags as S;

    let masks = match (old, new) {
        // From UNDEFINED: contents are discarded
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => {
            TransitionMasks::new(A::empty(), A::SHADER_READ, S::TOP_OF_PIPE, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::GENERAL) => {
            TransitionMasks::new(A::empty(), A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::empty(),
            A::COLOR_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            TransitionMasks::new(A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL) => {
            TransitionMasks::new(A::empty(), A::TRANSFER_READ, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::PRESENT_SRC_KHR) => {
            TransitionMasks::new(A::empty(), A::empty(), S::LATE_FRAGMENT_TESTS, S::TOP_OF_PIPE)
        }

        // Sampled textures going back to being written
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => {
            TransitionMasks::new(A::SHADER_READ, A::TRANSFER_WRITE, S::FRAGMENT_SHADER, S::TRANSFER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            TransitionMasks::new(A::SHADER_READ, A::TRANSFER_READ, S::FRAGMENT_SHADER, S::TRANSFER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks::new(
            A::empty(),
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            S::FRAGMENT_SHADER,
        ),
        (L::SHADER_READ_ONLY_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::SHADER_READ,
            A::COLOR_ATTACHMENT_WRITE,
            S::FRAGMENT_SHADER,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::SHADER_READ_ONLY_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::SHADER_READ,
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::FRAGMENT_SHADER,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::SHADER_READ_ONLY_OPTIMAL, L::GENERAL) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_READ,
            A::SHADER_WRITE,
            S::FRAGMENT_SHADER,
            S::COMPUTE_SHADER,
        ),

        // Transfers
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            TransitionMasks::new(A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            TransitionMasks::new(A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR) => {
            TransitionMasks::new(A::TRANSFER_WRITE, A::empty(), S::TRANSFER, S::BOTTOM_OF_PIPE)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => {
            TransitionMasks::new(A::TRANSFER_READ, A::TRANSFER_WRITE, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            TransitionMasks::new(A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::TRANSFER_READ,
            A::COLOR_ATTACHMENT_WRITE,
            S::TRANSFER,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),

        // Colour attachments
        (L::COLOR_ATTACHMENT_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_WRITE,
            A::COLOR_ATTACHMENT_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_WRITE,
            A::TRANSFER_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::TRANSFER,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_WRITE,
            A::TRANSFER_READ,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::TRANSFER,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_WRITE,
            A::SHADER_READ,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::FRAGMENT_SHADER,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::GENERAL) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_WRITE,
            A::SHADER_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::COMPUTE_SHADER,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => TransitionMasks::new(
            A::COLOR_ATTACHMENT_WRITE,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            S::BOTTOM_OF_PIPE,
        ),

        // Compute output read by fragment shaders
        (L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks::new(
            A::SHADER_WRITE,
            A::COLOR_ATTACHMENT_READ,
            S::COMPUTE_SHADER,
            S::FRAGMENT_SHADER,
        ),

        // Depth
        (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => {
            TransitionMasks::new(
                A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                S::LATE_FRAGMENT_TESTS,
                S::LATE_FRAGMENT_TESTS,
            )
        }
        (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks::new(
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            A::SHADER_READ,
            S::LATE_FRAGMENT_TESTS,
            S::FRAGMENT_SHADER,
        ),

        // Swapchain images
        (L::PRESENT_SRC_KHR, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks::new(
            A::empty(),
            A::COLOR_ATTACHMENT_WRITE,
            S::BOTTOM_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::PRESENT_SRC_KHR, L::TRANSFER_DST_OPTIMAL) => {
            TransitionMasks::new(A::empty(), A::TRANSFER_WRITE, S::BOTTOM_OF_PIPE, S::TRANSFER)
        }

        (old, new) => anyhow::bail!("Unsupported layout transition {:?} -> {:?}", old, new),
    };

    Ok(masks)
}

/// Aspect to use when transitioning an image of `format` into `new_layout`
pub fn aspect_mask_for(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    let is_depth = matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    );

    if is_depth || new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Barrier struct plus the stages it needs
pub fn image_barrier(
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    span: SubresourceSpan,
) -> Result<(vk::ImageMemoryBarrier, TransitionMasks)> {
    let masks = transition_masks(old, new)?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_mask_for(format, new),
            base_mip_level: span.base_mip,
            level_count: span.mip_levels,
            base_array_layer: span.base_layer,
            layer_count: span.layer_count,
        })
        .build();

    Ok((barrier, masks))
}

/// Record a layout transition into `cmd`
pub fn cmd_transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    span: SubresourceSpan,
) -> Result<()> {
    let (barrier, masks) = image_barrier(image, format, old, new, span)?;

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Transition synchronously through a one-shot command buffer
pub fn transition_image_layout(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    span: SubresourceSpan,
) -> Result<()> {
    // Validate before touching the queue
    transition_masks(old, new)?;

    device.execute_single_time(|cmd| {
        cmd_transition_image_layout(&device.device, cmd, image, format, old, new, span)
    })
}

/// One barrier per image, each from its own tracked layout, plus the
/// union of source and destination stages.
pub fn batch_barriers(
    images: &[&VulkanImage],
    new: vk::ImageLayout,
    span: SubresourceSpan,
) -> Result<(Vec<vk::ImageMemoryBarrier>, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    let mut barriers = Vec::with_capacity(images.len());
    let mut src_stage = vk::PipelineStageFlags::empty();
    let mut dst_stage = vk::PipelineStageFlags::empty();

    for image in images {
        let (barrier, masks) = image_barrier(image.image, image.format, image.layout, new, span)?;
        src_stage |= masks.src_stage;
        dst_stage |= masks.dst_stage;
        barriers.push(barrier);
    }

    Ok((barriers, src_stage, dst_stage))
}

/// Move every image to `new` with a single barrier call and update the
/// tracked layouts. Stages are the union over all images.
///
/// Nothing is recorded and no layout changes if any pair is unsupported.
pub fn cmd_transition_images(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    images: &mut [&mut VulkanImage],
    new: vk::ImageLayout,
    span: SubresourceSpan,
) -> Result<()> {
    if images.is_empty() {
        return Ok(());
    }

    let views: Vec<&VulkanImage> = images.iter().map(|image| &**image).collect();
    let (barriers, src_stage, dst_stage) = batch_barriers(&views, new, span)?;

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &barriers,
        );
    }

    for image in images.iter_mut() {
        image.layout = new;
    }
    Ok(())
}

/// Make a compute-written buffer visible to vertex shaders on the graphics queue
pub fn cmd_compute_buffer_barrier(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
) {
    let barrier = vk::BufferMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .src_queue_family_index(device.compute_queue_family)
        .dst_queue_family_index(device.graphics_queue_family)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
        .build();

    unsafe {
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::VERTEX_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

/// Make a compute-written GENERAL image visible to fragment shaders
pub fn cmd_compute_image_barrier(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .old_layout(vk::ImageLayout::GENERAL)
        .new_layout(vk::ImageLayout::GENERAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::ImageLayout as L;

    fn tracked(layout: vk::ImageLayout) -> VulkanImage {
        VulkanImage {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D { width: 4, height: 4, depth: 1 },
            mip_levels: 1,
            layer_count: 1,
            layout,
        }
    }

    #[test]
    fn batch_stages_are_the_union_over_images() {
        let fresh = tracked(L::UNDEFINED);
        let sampled = tracked(L::SHADER_READ_ONLY_OPTIMAL);

        let (barriers, src, dst) =
            batch_barriers(&[&fresh, &sampled], L::TRANSFER_DST_OPTIMAL, SubresourceSpan::single())
                .unwrap();

        assert_eq!(barriers.len(), 2);
        assert_eq!(
            src,
            vk::PipelineStageFlags::TOP_OF_PIPE | vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(dst, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn batch_barriers_start_from_each_images_own_layout() {
        let images = [
            tracked(L::UNDEFINED),
            tracked(L::COLOR_ATTACHMENT_OPTIMAL),
            tracked(L::SHADER_READ_ONLY_OPTIMAL),
        ];
        let refs: Vec<&VulkanImage> = images.iter().collect();

        let (barriers, _, _) =
            batch_barriers(&refs, L::TRANSFER_SRC_OPTIMAL, SubresourceSpan::single()).unwrap();

        let olds: Vec<_> = barriers.iter().map(|b| b.old_layout).collect();
        assert_eq!(
            olds,
            vec![L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL]
        );
        assert!(barriers.iter().all(|b| b.new_layout == L::TRANSFER_SRC_OPTIMAL));
    }

    #[test]
    fn unsupported_image_fails_the_whole_batch() {
        let fresh = tracked(L::UNDEFINED);
        let storage = tracked(L::GENERAL);

        let err = batch_barriers(&[&fresh, &storage], L::TRANSFER_DST_OPTIMAL, SubresourceSpan::single())
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported layout transition"));
        assert_eq!(fresh.layout, L::UNDEFINED);
        assert_eq!(storage.layout, L::GENERAL);
    }

    #[test]
    fn empty_batch_is_empty() {
        let (barriers, src, dst) =
            batch_barriers(&[], L::SHADER_READ_ONLY_OPTIMAL, SubresourceSpan::single()).unwrap();
        assert!(barriers.is_empty());
        assert!(src.is_empty() && dst.is_empty());
    }

    #[test]
    fn upload_path_transitions() {
        let to_dst = transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.src_access, vk::AccessFlags::empty());
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn download_path_round_trips_through_transfer_src() {
        let to_src = transition_masks(L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_SRC_OPTIMAL).unwrap();
        assert_eq!(to_src.src_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(to_src.dst_access, vk::AccessFlags::TRANSFER_READ);

        let target = transition_masks(L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL).unwrap();
        assert_eq!(target.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(transition_masks(L::TRANSFER_SRC_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL).is_ok());

        let back = transition_masks(L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(back.src_access, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(back.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn depth_attachment_from_undefined() {
        let masks = transition_masks(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(
            masks.dst_access,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn compute_handoff_stages() {
        let to_general = transition_masks(L::COLOR_ATTACHMENT_OPTIMAL, L::GENERAL).unwrap();
        assert_eq!(to_general.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(to_general.dst_access, vk::AccessFlags::SHADER_WRITE);

        let from_general = transition_masks(L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(from_general.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn attachment_to_transfer_waits_for_colour_output() {
        let masks = transition_masks(L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn unknown_pair_is_an_error() {
        let err = transition_masks(L::GENERAL, L::TRANSFER_DST_OPTIMAL).unwrap_err();
        assert!(err.to_string().contains("Unsupported layout transition"));
        assert!(transition_masks(L::PREINITIALIZED, L::GENERAL).is_err());
    }

    #[test]
    fn aspect_mask_from_format_and_layout() {
        assert_eq!(
            aspect_mask_for(vk::Format::R8G8B8A8_UNORM, L::SHADER_READ_ONLY_OPTIMAL),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_mask_for(vk::Format::D32_SFLOAT, L::SHADER_READ_ONLY_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask_for(vk::Format::D24_UNORM_S8_UINT, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask_for(vk::Format::D32_SFLOAT_S8_UINT, L::TRANSFER_DST_OPTIMAL),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        // Layout alone is enough to select depth
        assert_eq!(
            aspect_mask_for(vk::Format::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn barrier_carries_span_and_ignored_families() {
        let span = SubresourceSpan {
            base_mip: 2,
            mip_levels: 3,
            base_layer: 1,
            layer_count: 5,
        };
        let (barrier, _) = image_barrier(
            vk::Image::null(),
            vk::Format::R8G8B8A8_UNORM,
            L::UNDEFINED,
            L::TRANSFER_DST_OPTIMAL,
            span,
        )
        .unwrap();

        assert_eq!(barrier.subresource_range.base_mip_level, 2);
        assert_eq!(barrier.subresource_range.level_count, 3);
        assert_eq!(barrier.subresource_range.base_array_layer, 1);
        assert_eq!(barrier.subresource_range.layer_count, 5);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.old_layout, L::UNDEFINED);
        assert_eq!(barrier.new_layout, L::TRANSFER_DST_OPTIMAL);
    }
}
