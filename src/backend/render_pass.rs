// Render passes and framebuffers
//
// A pass is described by where its attachments come from and where they go
// next (RenderPassFlow). The layout and load-op tables are plain functions so
// they can be checked without a device.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Where a pass sits in the frame: the layouts its attachments arrive in and
/// leave with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPassFlow {
    /// Fresh attachments, contents discarded
    #[default]
    First,
    /// Final pass before presentation
    Last,
    /// Renders onto an image that was just presented
    Present,
    FirstToAttachment,
    FirstToShaderRead,
    AttachmentToAttachment,
    AttachmentToShaderRead,
    ShaderReadToAttachment,
    ShaderReadToShaderRead,
}

impl RenderPassFlow {
    /// Flows that must keep the previous contents
    pub fn reads_previous_contents(self) -> bool {
        matches!(
            self,
            RenderPassFlow::ShaderReadToAttachment | RenderPassFlow::ShaderReadToShaderRead
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderPassCreateInfo {
    pub clear_color: bool,
    pub clear_depth: bool,
    pub flow: RenderPassFlow,
}

impl RenderPassCreateInfo {
    pub fn new(clear_color: bool, clear_depth: bool, flow: RenderPassFlow) -> Self {
        Self {
            clear_color,
            clear_depth,
            flow,
        }
    }
}

/// A render pass together with the description it was built from
#[derive(Debug, Clone, Copy)]
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub info: RenderPassCreateInfo,
}

impl RenderPass {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_render_pass(self.handle, None) };
    }
}

// =============================================================================
// LAYOUT TABLES
// =============================================================================

/// (initial, final) layout of the colour attachment
pub fn color_attachment_layouts(flow: RenderPassFlow) -> (vk::ImageLayout, vk::ImageLayout) {
    use ash::vk::ImageLayout as L;
    use RenderPassFlow as F;

    match flow {
        F::First => (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL),
        F::Last => (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR),
        F::Present => (L::PRESENT_SRC_KHR, L::COLOR_ATTACHMENT_OPTIMAL),
        F::FirstToAttachment | F::AttachmentToAttachment => {
            (L::COLOR_ATTACHMENT_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL)
        }
        F::FirstToShaderRead | F::AttachmentToShaderRead => {
            (L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)
        }
        F::ShaderReadToAttachment => (L::SHADER_READ_ONLY_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL),
        F::ShaderReadToShaderRead => (L::SHADER_READ_ONLY_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
    }
}

/// (initial, final) layout of the depth attachment in a colour + depth pass
pub fn depth_attachment_layouts(flow: RenderPassFlow) -> (vk::ImageLayout, vk::ImageLayout) {
    use ash::vk::ImageLayout as L;
    use RenderPassFlow as F;

    match flow {
        F::First => (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        F::Last | F::Present | F::FirstToAttachment | F::AttachmentToAttachment => (
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        F::FirstToShaderRead | F::AttachmentToShaderRead => {
            (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)
        }
        F::ShaderReadToAttachment => {
            (L::SHADER_READ_ONLY_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        }
        F::ShaderReadToShaderRead => (L::SHADER_READ_ONLY_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
    }
}

pub fn color_load_op(info: &RenderPassCreateInfo) -> vk::AttachmentLoadOp {
    if info.flow.reads_previous_contents() || !info.clear_color {
        vk::AttachmentLoadOp::LOAD
    } else {
        vk::AttachmentLoadOp::CLEAR
    }
}

pub fn depth_load_op(info: &RenderPassCreateInfo) -> vk::AttachmentLoadOp {
    if info.flow.reads_previous_contents() || !info.clear_depth {
        vk::AttachmentLoadOp::LOAD
    } else {
        vk::AttachmentLoadOp::CLEAR
    }
}

/// (initial, final) layout and load op for a depth-only pass
pub fn depth_only_attachment(info: &RenderPassCreateInfo) -> (vk::ImageLayout, vk::ImageLayout, vk::AttachmentLoadOp) {
    let initial = if info.clear_depth {
        vk::ImageLayout::UNDEFINED
    } else if info.flow == RenderPassFlow::ShaderReadToAttachment {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    };

    let final_layout = if info.flow == RenderPassFlow::FirstToShaderRead {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    };

    let load_op = if info.clear_depth {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::DONT_CARE
    };

    (initial, final_layout, load_op)
}

/// External dependencies for a colour pass
pub fn subpass_dependencies(flow: RenderPassFlow) -> Vec<vk::SubpassDependency> {
    if flow == RenderPassFlow::FirstToShaderRead {
        // Sampled last frame, written now, sampled again afterwards
        return vec![
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dependency_flags(vk::DependencyFlags::BY_REGION)
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION)
                .build(),
        ];
    }

    vec![vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
        .build()]
}

// =============================================================================
// RENDER PASS CREATION
// =============================================================================

fn color_attachment(format: vk::Format, info: &RenderPassCreateInfo) -> vk::AttachmentDescription {
    let (initial, final_layout) = color_attachment_layouts(info.flow);
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(color_load_op(info))
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial)
        .final_layout(final_layout)
        .build()
}

fn depth_attachment(format: vk::Format, info: &RenderPassCreateInfo) -> vk::AttachmentDescription {
    let (initial, final_layout) = depth_attachment_layouts(info.flow);
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(depth_load_op(info))
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
        .stencil_store_op(vk::AttachmentStoreOp::STORE)
        .initial_layout(initial)
        .final_layout(final_layout)
        .build()
}

/// Single-subpass pass with one colour attachment and, when `use_depth`, a
/// depth attachment in the device's depth format.
pub fn create_color_and_depth_render_pass(
    device: &VulkanDevice,
    use_depth: bool,
    info: RenderPassCreateInfo,
    color_format: vk::Format,
) -> Result<RenderPass> {
    let mut attachments = vec![color_attachment(color_format, &info)];
    if use_depth {
        let depth_format = device.find_depth_format()?;
        attachments.push(depth_attachment(depth_format, &info));
    }

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if use_depth {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }
    let subpasses = [subpass.build()];

    let dependencies = subpass_dependencies(info.flow);

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create colour/depth render pass")?;

    log::debug!(
        "Created render pass {:?} (depth: {}, clear colour: {}, clear depth: {})",
        info.flow,
        use_depth,
        info.clear_color,
        info.clear_depth
    );
    Ok(RenderPass { handle, info })
}

pub fn create_color_only_render_pass(
    device: &VulkanDevice,
    info: RenderPassCreateInfo,
    color_format: vk::Format,
) -> Result<RenderPass> {
    let info = RenderPassCreateInfo {
        clear_depth: false,
        ..info
    };
    create_color_and_depth_render_pass(device, false, info, color_format)
}

/// Pass with a single depth attachment (shadow maps)
pub fn create_depth_only_render_pass(device: &VulkanDevice, info: RenderPassCreateInfo) -> Result<RenderPass> {
    let depth_format = device.find_depth_format()?;
    let (initial, final_layout, load_op) = depth_only_attachment(&info);

    let attachments = [vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial)
        .final_layout(final_layout)
        .build()];

    let depth_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .depth_stencil_attachment(&depth_ref)
        .build()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses);

    let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create depth-only render pass")?;

    Ok(RenderPass { handle, info })
}

// =============================================================================
// FRAMEBUFFERS
// =============================================================================

/// Colour view first, then the depth view when there is one
pub fn framebuffer_attachments(color: vk::ImageView, depth: Option<vk::ImageView>) -> Vec<vk::ImageView> {
    std::iter::once(color).chain(depth).collect()
}

fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: &RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass.handle)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .context("Failed to create framebuffer")
}

pub fn create_depth_only_framebuffer(
    device: &VulkanDevice,
    render_pass: &RenderPass,
    depth_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    create_framebuffer(device, render_pass, &[depth_view], extent)
}

pub fn create_color_and_depth_framebuffer(
    device: &VulkanDevice,
    render_pass: &RenderPass,
    color_view: vk::ImageView,
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    create_framebuffer(
        device,
        render_pass,
        &framebuffer_attachments(color_view, depth_view),
        extent,
    )
}

/// One framebuffer per swapchain image, all sharing the same depth view
pub fn create_color_and_depth_framebuffers(
    device: &VulkanDevice,
    render_pass: &RenderPass,
    image_views: &[vk::ImageView],
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &view in image_views {
        match create_color_and_depth_framebuffer(device, render_pass, view, depth_view, extent) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                destroy_framebuffers(&device.device, &framebuffers);
                return Err(e);
            }
        }
    }
    Ok(framebuffers)
}

pub fn destroy_framebuffers(device: &ash::Device, framebuffers: &[vk::Framebuffer]) {
    for &framebuffer in framebuffers {
        unsafe { device.destroy_framebuffer(framebuffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::ImageLayout as L;
    use RenderPassFlow as F;

    #[test]
    fn first_and_last_bracket_the_frame() {
        assert_eq!(color_attachment_layouts(F::First), (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(color_attachment_layouts(F::Last), (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR));
        assert_eq!(
            depth_attachment_layouts(F::First),
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
        assert_eq!(
            depth_attachment_layouts(F::Last),
            (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn present_flow_starts_from_present_src() {
        assert_eq!(
            color_attachment_layouts(F::Present),
            (L::PRESENT_SRC_KHR, L::COLOR_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn shader_read_flows() {
        for flow in [F::FirstToShaderRead, F::AttachmentToShaderRead] {
            assert_eq!(color_attachment_layouts(flow).1, L::SHADER_READ_ONLY_OPTIMAL);
            assert_eq!(depth_attachment_layouts(flow).1, L::SHADER_READ_ONLY_OPTIMAL);
        }
        assert_eq!(
            color_attachment_layouts(F::ShaderReadToAttachment),
            (L::SHADER_READ_ONLY_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL)
        );
        assert_eq!(
            depth_attachment_layouts(F::ShaderReadToShaderRead),
            (L::SHADER_READ_ONLY_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn load_ops_follow_clear_flags() {
        let clearing = RenderPassCreateInfo::new(true, true, F::First);
        assert_eq!(color_load_op(&clearing), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth_load_op(&clearing), vk::AttachmentLoadOp::CLEAR);

        let keeping = RenderPassCreateInfo::new(false, false, F::AttachmentToAttachment);
        assert_eq!(color_load_op(&keeping), vk::AttachmentLoadOp::LOAD);
        assert_eq!(depth_load_op(&keeping), vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn reading_flows_never_clear() {
        for flow in [F::ShaderReadToAttachment, F::ShaderReadToShaderRead] {
            let info = RenderPassCreateInfo::new(true, true, flow);
            assert_eq!(color_load_op(&info), vk::AttachmentLoadOp::LOAD);
            assert_eq!(depth_load_op(&info), vk::AttachmentLoadOp::LOAD);
        }
    }

    #[test]
    fn depth_only_pass_layouts() {
        let cleared = RenderPassCreateInfo::new(false, true, F::First);
        assert_eq!(
            depth_only_attachment(&cleared),
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, vk::AttachmentLoadOp::CLEAR)
        );

        let resampled = RenderPassCreateInfo::new(false, false, F::ShaderReadToAttachment);
        assert_eq!(
            depth_only_attachment(&resampled),
            (
                L::SHADER_READ_ONLY_OPTIMAL,
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::AttachmentLoadOp::DONT_CARE
            )
        );

        let shadow = RenderPassCreateInfo::new(false, true, F::FirstToShaderRead);
        assert_eq!(depth_only_attachment(&shadow).1, L::SHADER_READ_ONLY_OPTIMAL);

        let kept = RenderPassCreateInfo::new(false, false, F::AttachmentToAttachment);
        assert_eq!(depth_only_attachment(&kept).0, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn default_dependency_guards_colour_output() {
        let deps = subpass_dependencies(F::First);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(
            deps[0].dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn shader_read_target_gets_two_by_region_dependencies() {
        let deps = subpass_dependencies(F::FirstToShaderRead);
        assert_eq!(deps.len(), 2);
        assert!(deps
            .iter()
            .all(|d| d.dependency_flags == vk::DependencyFlags::BY_REGION));
        assert_eq!(deps[0].src_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(deps[1].dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[1].dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn framebuffer_attachment_order() {
        let color = vk::ImageView::null();
        assert_eq!(framebuffer_attachments(color, None).len(), 1);
        assert_eq!(framebuffer_attachments(color, Some(vk::ImageView::null())).len(), 2);
    }
}
