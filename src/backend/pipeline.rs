// Pipelines, pipeline layouts and descriptors
//
// The graphics pipeline is assembled from a GraphicsPipelineDesc: shader files
// (stage inferred from the name), vertex layout, topology and the handful of
// fixed-function switches the renderers need.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;

use super::image::VulkanTexture;
use super::shader::{self, ShaderModule};
use super::VulkanDevice;

/// Everything needed to build a graphics pipeline besides the render pass
/// and layout.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// SPIR-V files (or their GLSL names; `.spv` is appended when missing)
    pub shader_files: Vec<PathBuf>,
    pub color_attachment_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub use_depth: bool,
    pub use_blending: bool,
    pub dynamic_scissor: bool,
    /// Viewport size; zero or negative uses the framebuffer size
    pub custom_width: i32,
    pub custom_height: i32,
    pub patch_control_points: u32,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub wireframe: bool,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            shader_files: Vec::new(),
            color_attachment_count: 1,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            use_depth: true,
            use_blending: false,
            dynamic_scissor: false,
            custom_width: -1,
            custom_height: -1,
            patch_control_points: 0,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            wireframe: false,
        }
    }
}

impl GraphicsPipelineDesc {
    pub fn new<P: Into<PathBuf>>(shader_files: impl IntoIterator<Item = P>) -> Self {
        Self {
            shader_files: shader_files.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    /// Viewport/scissor size for this pipeline
    pub fn viewport_extent(&self, framebuffer: vk::Extent2D) -> vk::Extent2D {
        vk::Extent2D {
            width: if self.custom_width > 0 {
                self.custom_width as u32
            } else {
                framebuffer.width
            },
            height: if self.custom_height > 0 {
                self.custom_height as u32
            } else {
                framebuffer.height
            },
        }
    }

    pub fn uses_tessellation(&self) -> bool {
        self.topology == vk::PrimitiveTopology::PATCH_LIST
    }
}

/// Additive colour blending when enabled; alpha takes the source value
pub fn blend_attachment(use_blending: bool) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(use_blending)
        .src_color_blend_factor(vk::BlendFactor::ONE)
        .dst_color_blend_factor(vk::BlendFactor::ONE)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()
}

fn load_shaders(device: &VulkanDevice, files: &[PathBuf]) -> Result<Vec<ShaderModule>> {
    let mut modules = Vec::with_capacity(files.len());
    for file in files {
        match ShaderModule::from_file(device, file) {
            Ok(module) => modules.push(module),
            Err(e) => {
                modules.iter().for_each(|m| m.destroy(&device.device));
                return Err(e);
            }
        }
    }
    Ok(modules)
}

pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    desc: &GraphicsPipelineDesc,
    framebuffer_extent: vk::Extent2D,
) -> Result<vk::Pipeline> {
    if desc.shader_files.is_empty() {
        anyhow::bail!("A graphics pipeline needs at least one shader");
    }

    let modules = load_shaders(device, &desc.shader_files)?;
    let shader_stages: Vec<_> = modules.iter().map(ShaderModule::stage_info).collect();

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&desc.vertex_bindings)
        .vertex_attribute_descriptions(&desc.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    let extent = desc.viewport_extent(framebuffer_extent);
    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(if desc.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::CLOCKWISE)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false)
        .min_sample_shading(1.0);

    let blend_attachments =
        vec![blend_attachment(desc.use_blending); desc.color_attachment_count as usize];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(&blend_attachments);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0);

    let dynamic_states = [vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let tessellation_state = vk::PipelineTessellationStateCreateInfo::builder()
        .patch_control_points(desc.patch_control_points);

    let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .base_pipeline_index(-1);

    if desc.uses_tessellation() {
        pipeline_info = pipeline_info.tessellation_state(&tessellation_state);
    }
    if desc.use_depth {
        pipeline_info = pipeline_info.depth_stencil_state(&depth_stencil);
    }
    if desc.dynamic_scissor {
        pipeline_info = pipeline_info.dynamic_state(&dynamic_state);
    }

    let result = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
    };

    modules.iter().for_each(|m| m.destroy(&device.device));

    let pipelines = result
        .map_err(|(_, e)| e)
        .context("Failed to create graphics pipeline")?;

    log::info!(
        "Created graphics pipeline ({} stages, {:?}, {}x{})",
        shader_stages.len(),
        desc.topology,
        extent.width,
        extent.height
    );
    pipelines
        .into_iter()
        .next()
        .context("Driver returned no graphics pipeline")
}

pub fn create_compute_pipeline(
    device: &VulkanDevice,
    compute_shader: vk::ShaderModule,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let pipeline_info = vk::ComputePipelineCreateInfo::builder()
        .stage(shader::stage_info(
            compute_shader,
            vk::ShaderStageFlags::COMPUTE,
            shader::ENTRY_POINT,
        ))
        .layout(layout);

    let pipelines = unsafe {
        device
            .device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
    }
    .map_err(|(_, e)| e)
    .context("Failed to create compute pipeline")?;

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no compute pipeline")
}

// =============================================================================
// PIPELINE LAYOUTS
// =============================================================================

/// Vertex constants first, fragment constants right after. Empty ranges are
/// left out.
pub fn push_constant_ranges(vertex_size: u32, fragment_size: u32) -> Vec<vk::PushConstantRange> {
    let mut ranges = Vec::with_capacity(2);
    if vertex_size > 0 {
        ranges.push(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: vertex_size,
        });
    }
    if fragment_size > 0 {
        ranges.push(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: vertex_size,
            size: fragment_size,
        });
    }
    ranges
}

pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layout: Option<vk::DescriptorSetLayout>,
) -> Result<vk::PipelineLayout> {
    create_pipeline_layout_with_constants(device, set_layout, 0, 0)
}

pub fn create_pipeline_layout_with_constants(
    device: &VulkanDevice,
    set_layout: Option<vk::DescriptorSetLayout>,
    vertex_const_size: u32,
    fragment_const_size: u32,
) -> Result<vk::PipelineLayout> {
    let set_layouts: Vec<_> = set_layout.into_iter().collect();
    let ranges = push_constant_ranges(vertex_const_size, fragment_const_size);

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&ranges);

    unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create pipeline layout")
}

// =============================================================================
// DESCRIPTORS
// =============================================================================

pub fn descriptor_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(1)
        .stage_flags(stages)
        .build()
}

pub fn create_descriptor_set_layout(
    device: &VulkanDevice,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout> {
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

    unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .context("Failed to create descriptor set layout")
}

/// Input and output storage buffers at bindings 0 and 1
pub fn create_compute_descriptor_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    create_descriptor_set_layout(
        device,
        &[
            descriptor_binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE),
            descriptor_binding(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE),
        ],
    )
}

/// Pool sizes for `image_count` sets, each holding the given number of
/// uniform buffers, storage buffers and combined image samplers
pub fn descriptor_pool_sizes(
    image_count: u32,
    uniform_buffers: u32,
    storage_buffers: u32,
    samplers: u32,
) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::UNIFORM_BUFFER, uniform_buffers),
        (vk::DescriptorType::STORAGE_BUFFER, storage_buffers),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, samplers),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, count)| vk::DescriptorPoolSize {
        ty,
        descriptor_count: image_count * count,
    })
    .collect()
}

/// Pool with room for one set per swapchain image
pub fn create_descriptor_pool(
    device: &VulkanDevice,
    image_count: u32,
    uniform_buffers: u32,
    storage_buffers: u32,
    samplers: u32,
) -> Result<vk::DescriptorPool> {
    let pool_sizes = descriptor_pool_sizes(image_count, uniform_buffers, storage_buffers, samplers);

    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .max_sets(image_count)
        .pool_sizes(&pool_sizes);

    unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .context("Failed to create descriptor pool")
}

/// Write one texture into element `index` of a sampler array binding
pub fn update_texture_in_descriptor_set_array(
    device: &VulkanDevice,
    set: vk::DescriptorSet,
    texture: &VulkanTexture,
    index: u32,
    binding: u32,
) {
    let image_info = [vk::DescriptorImageInfo {
        sampler: texture.sampler,
        image_view: texture.image.view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }];

    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(index)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&image_info)
        .build();

    unsafe { device.device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_push_constant_ranges() {
        let ranges = push_constant_ranges(64, 16);
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].offset, ranges[0].size), (0, 64));
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!((ranges[1].offset, ranges[1].size), (64, 16));
        assert_eq!(ranges[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn empty_push_constant_ranges_are_dropped() {
        assert!(push_constant_ranges(0, 0).is_empty());

        let fragment_only = push_constant_ranges(0, 32);
        assert_eq!(fragment_only.len(), 1);
        assert_eq!(fragment_only[0].offset, 0);
        assert_eq!(fragment_only[0].stage_flags, vk::ShaderStageFlags::FRAGMENT);

        let vertex_only = push_constant_ranges(128, 0);
        assert_eq!(vertex_only.len(), 1);
        assert_eq!(vertex_only[0].stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn pool_sizes_scale_with_image_count() {
        let sizes = descriptor_pool_sizes(3, 1, 2, 4);
        let counts: Vec<_> = sizes.iter().map(|s| (s.ty, s.descriptor_count)).collect();
        assert_eq!(
            counts,
            vec![
                (vk::DescriptorType::UNIFORM_BUFFER, 3),
                (vk::DescriptorType::STORAGE_BUFFER, 6),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 12),
            ]
        );
    }

    #[test]
    fn zero_counts_are_skipped() {
        let sizes = descriptor_pool_sizes(2, 0, 3, 0);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert!(descriptor_pool_sizes(2, 0, 0, 0).is_empty());
    }

    #[test]
    fn custom_viewport_overrides_framebuffer() {
        let framebuffer = vk::Extent2D { width: 1280, height: 720 };
        let desc = GraphicsPipelineDesc::default();
        assert_eq!(desc.viewport_extent(framebuffer), framebuffer);

        let shadow = GraphicsPipelineDesc {
            custom_width: 2048,
            custom_height: 0,
            ..Default::default()
        };
        assert_eq!(
            shadow.viewport_extent(framebuffer),
            vk::Extent2D { width: 2048, height: 720 }
        );
    }

    #[test]
    fn tessellation_only_for_patches() {
        let mut desc = GraphicsPipelineDesc::new(["a.vert", "a.tesc", "a.tese", "a.frag"]);
        assert_eq!(desc.shader_files.len(), 4);
        assert!(!desc.uses_tessellation());
        desc.topology = vk::PrimitiveTopology::PATCH_LIST;
        assert!(desc.uses_tessellation());
    }

    #[test]
    fn blending_is_additive() {
        let on = blend_attachment(true);
        assert_eq!(on.blend_enable, vk::TRUE);
        assert_eq!(on.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(on.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(on.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(blend_attachment(false).blend_enable, vk::FALSE);
    }
}
