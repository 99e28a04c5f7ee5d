// =============================================================================
// VK-TOOLKIT DEMO - A textured quad on top of the toolkit
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Submit that image's pre-recorded commands
//    (scene pass: clear + quad, finish pass: hand the image to presentation)
// 4. Present
//
// Usage: vk-toolkit-demo [texture-file]
// Without a file a generated checkerboard is used. P reads the texture back
// from the GPU and writes it to texture_readback.png.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec3};
use image::RgbaImage;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use vk_toolkit::backend::commands::record_commands;
use vk_toolkit::backend::image::{self as img, VulkanImage};
use vk_toolkit::backend::mesh::{MeshData, TexturedVertex, Vertex};
use vk_toolkit::backend::pipeline::{self, GraphicsPipelineDesc};
use vk_toolkit::backend::render_pass::{self, RenderPass, RenderPassCreateInfo, RenderPassFlow};
use vk_toolkit::backend::{transfer, GeometryBuffer, VulkanContext, VulkanDevice, VulkanTexture};
use vk_toolkit::Config;

const CHECKER_SIZE: u32 = 256;
const CHECKER_TILE: u32 = 32;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.debug.log_level.as_str()),
    )
    .init();

    log::info!("Starting vk-toolkit demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let texture_path = std::env::args().nth(1).map(PathBuf::from);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, texture_path);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn checkerboard() -> RgbaImage {
    RgbaImage::from_fn(CHECKER_SIZE, CHECKER_SIZE, |x, y| {
        if (x / CHECKER_TILE + y / CHECKER_TILE) % 2 == 0 {
            image::Rgba([230, 230, 230, 255])
        } else {
            image::Rgba([40, 90, 160, 255])
        }
    })
}

fn quad_mesh() -> MeshData<TexturedVertex> {
    let corners = [
        ([-0.6, -0.6, 0.5], [0.0, 0.0]),
        ([0.6, -0.6, 0.5], [1.0, 0.0]),
        ([0.6, 0.6, 0.5], [1.0, 1.0]),
        ([-0.6, 0.6, 0.5], [0.0, 1.0]),
    ];
    let vertices = corners
        .iter()
        .map(|&(pos, uv)| TexturedVertex {
            pos: Vec3::from_array(pos),
            uv: Vec2::from_array(uv),
        })
        .collect();
    MeshData::from_triangles(vertices, &[[0, 1, 2], [2, 3, 0]])
}

fn shader_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders").join(name)
}

// =============================================================================
// SCENE - resources that survive swapchain recreation
// =============================================================================

struct Scene {
    texture: VulkanTexture,
    quad: GeometryBuffer,
    index_count: u32,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
}

impl Scene {
    fn new(device: &VulkanDevice, config: &Config, texture_path: Option<&Path>) -> Result<Self> {
        let image = match texture_path {
            Some(path) => transfer::create_texture_image(device, path)?,
            None => {
                let board = checkerboard();
                let mut image = transfer::create_texture_image_from_data(
                    device,
                    board.as_raw(),
                    CHECKER_SIZE,
                    CHECKER_SIZE,
                    transfer::TEXTURE_FORMAT,
                    vk::ImageCreateFlags::empty(),
                    1,
                )?;
                if let Err(e) = image.create_view(device, vk::ImageAspectFlags::COLOR, vk::ImageViewType::TYPE_2D) {
                    image.destroy(&device.device);
                    return Err(e);
                }
                device.set_object_name(image.image, "checkerboard");
                image
            }
        };

        let sampler = match img::create_texture_sampler(
            device,
            image.mip_levels as f32,
            config.graphics.max_anisotropy,
            vk::Filter::LINEAR,
            vk::Filter::LINEAR,
            vk::SamplerAddressMode::REPEAT,
        ) {
            Ok(sampler) => sampler,
            Err(e) => {
                image.destroy(&device.device);
                return Err(e);
            }
        };

        // From here on `destroy` cleans up whatever got created
        let mut scene = Self {
            texture: VulkanTexture { image, sampler },
            quad: GeometryBuffer {
                buffer: vk_toolkit::backend::Buffer {
                    handle: vk::Buffer::null(),
                    memory: vk::DeviceMemory::null(),
                    size: 0,
                },
                vertex_size: 0,
                index_size: 0,
            },
            index_count: 0,
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pipeline_layout: vk::PipelineLayout::null(),
        };

        if let Err(e) = scene.build(device) {
            scene.destroy(&device.device);
            return Err(e);
        }
        Ok(scene)
    }

    fn build(&mut self, device: &VulkanDevice) -> Result<()> {
        let mesh = quad_mesh();
        self.quad = mesh.upload(device)?;
        self.index_count = mesh.indices.len() as u32;

        self.set_layout = pipeline::create_descriptor_set_layout(
            device,
            &[pipeline::descriptor_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        self.descriptor_pool = pipeline::create_descriptor_pool(device, 1, 0, 0, 1)?;

        let set_layouts = [self.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        self.descriptor_set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?
            .into_iter()
            .next()
            .context("Driver returned no descriptor set")?;
        pipeline::update_texture_in_descriptor_set_array(device, self.descriptor_set, &self.texture, 0, 0);

        self.pipeline_layout = pipeline::create_pipeline_layout(device, Some(self.set_layout))?;
        Ok(())
    }

    /// Read the texture back from the GPU and save it as a PNG
    fn save_readback(&mut self, device: &VulkanDevice, path: &Path) -> Result<()> {
        device.wait_idle()?;

        let image = &mut self.texture.image;
        let mut pixels = vec![0u8; transfer::level0_size(image)? as usize];
        transfer::download_image_data(device, image, &mut pixels)?;

        let readback = RgbaImage::from_raw(image.extent.width, image.extent.height, pixels)
            .context("Readback size does not match the texture")?;
        readback
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Wrote texture readback to {}", path.display());
        Ok(())
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            // Frees the descriptor set too
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_sampler(self.texture.sampler, None);
        }
        self.quad.destroy(device);
        self.texture.image.destroy(device);
    }
}

// =============================================================================
// TARGETS - resources rebuilt with the swapchain
// =============================================================================

struct Targets {
    depth: VulkanImage,
    /// Clears and draws; leaves colour in COLOR_ATTACHMENT_OPTIMAL
    scene_pass: RenderPass,
    /// Moves colour to PRESENT_SRC
    finish_pass: RenderPass,
    /// Compatible passes, so both use the same framebuffers
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: vk::Pipeline,
    extent: vk::Extent2D,
}

impl Targets {
    fn new(device: &VulkanDevice, ctx: &VulkanContext, layout: vk::PipelineLayout) -> Result<Self> {
        let extent = ctx.swapchain.extent;
        let null_pass = RenderPass {
            handle: vk::RenderPass::null(),
            info: RenderPassCreateInfo::default(),
        };

        let mut targets = Self {
            depth: img::create_depth_resources(device, extent.width, extent.height)?,
            scene_pass: null_pass,
            finish_pass: null_pass,
            framebuffers: Vec::new(),
            pipeline: vk::Pipeline::null(),
            extent,
        };

        if let Err(e) = targets.build(device, ctx, layout) {
            targets.destroy(&device.device);
            return Err(e);
        }
        Ok(targets)
    }

    fn build(&mut self, device: &VulkanDevice, ctx: &VulkanContext, layout: vk::PipelineLayout) -> Result<()> {
        let format = ctx.swapchain.format;

        self.scene_pass = render_pass::create_color_and_depth_render_pass(
            device,
            true,
            RenderPassCreateInfo::new(true, true, RenderPassFlow::First),
            format,
        )?;
        self.finish_pass = render_pass::create_color_and_depth_render_pass(
            device,
            true,
            RenderPassCreateInfo::new(false, false, RenderPassFlow::Last),
            format,
        )?;

        self.framebuffers = render_pass::create_color_and_depth_framebuffers(
            device,
            &self.scene_pass,
            &ctx.swapchain.image_views,
            Some(self.depth.view),
            self.extent,
        )?;

        let desc = GraphicsPipelineDesc::new([shader_path("quad.vert"), shader_path("quad.frag")])
            .vertex_input(
                vec![TexturedVertex::binding_description()],
                TexturedVertex::attribute_descriptions(),
            );
        self.pipeline =
            pipeline::create_graphics_pipeline(device, self.scene_pass.handle, layout, &desc, self.extent)?;

        log::info!("Render targets ready ({}x{})", self.extent.width, self.extent.height);
        Ok(())
    }

    /// Handles are nulled afterwards, so a second call is harmless
    fn destroy(&mut self, device: &ash::Device) {
        unsafe { device.destroy_pipeline(self.pipeline, None) };
        render_pass::destroy_framebuffers(device, &self.framebuffers);
        self.finish_pass.destroy(device);
        self.scene_pass.destroy(device);
        self.depth.destroy(device);

        self.pipeline = vk::Pipeline::null();
        self.framebuffers.clear();
        self.finish_pass.handle = vk::RenderPass::null();
        self.scene_pass.handle = vk::RenderPass::null();
        self.depth.view = vk::ImageView::null();
        self.depth.image = vk::Image::null();
        self.depth.memory = vk::DeviceMemory::null();
    }
}

/// Record every per-image command buffer: scene pass, then finish pass
fn record_frames(ctx: &VulkanContext, scene: &Scene, targets: &Targets, clear_color: [f32; 4]) -> Result<()> {
    let device = &ctx.device.device;

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: targets.extent,
    };

    for (i, (&cmd, &framebuffer)) in ctx
        .commands
        .buffers
        .iter()
        .zip(&targets.framebuffers)
        .enumerate()
    {
        ctx.commands.reset(device, i)?;

        record_commands(device, cmd, |cmd| {
            let scene_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(targets.scene_pass.handle)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            let finish_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(targets.finish_pass.handle)
                .framebuffer(framebuffer)
                .render_area(render_area);

            unsafe {
                device.cmd_begin_render_pass(cmd, &scene_begin, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, targets.pipeline);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    scene.pipeline_layout,
                    0,
                    &[scene.descriptor_set],
                    &[],
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[scene.quad.buffer.handle], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    scene.quad.buffer.handle,
                    scene.quad.index_offset(),
                    vk::IndexType::UINT32,
                );
                device.cmd_draw_indexed(cmd, scene.index_count, 1, 0, 0, 0);
                device.cmd_end_render_pass(cmd);

                // Empty pass; its final layout does the hand-off
                device.cmd_begin_render_pass(cmd, &finish_begin, vk::SubpassContents::INLINE);
                device.cmd_end_render_pass(cmd);
            }
            Ok(())
        })?;
    }

    log::debug!("Recorded {} command buffers", ctx.commands.len());
    Ok(())
}

// =============================================================================
// RENDERER
// =============================================================================

/// Field order matters for Drop: targets and scene are destroyed by hand,
/// the context goes last.
struct Renderer {
    targets: Targets,
    scene: Scene,
    /// Fence of the frame currently using each swapchain image
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
    ctx: VulkanContext,
}

impl Renderer {
    fn new(config: &Config, window: &Window, texture_path: Option<&Path>) -> Result<Self> {
        let size = window.inner_size();
        let ctx = VulkanContext::new(
            config,
            window.display_handle()?.as_raw(),
            window.window_handle()?.as_raw(),
            size.width,
            size.height,
        )?;

        let scene = Scene::new(&ctx.device, config, texture_path)?;
        let targets = match Targets::new(&ctx.device, &ctx, scene.pipeline_layout) {
            Ok(targets) => targets,
            Err(e) => {
                scene.destroy(&ctx.device.device);
                return Err(e);
            }
        };

        let renderer = Self {
            images_in_flight: vec![vk::Fence::null(); ctx.image_count()],
            targets,
            scene,
            current_frame: 0,
            ctx,
        };
        record_frames(
            &renderer.ctx,
            &renderer.scene,
            &renderer.targets,
            config.graphics.clear_color,
        )?;
        Ok(renderer)
    }

    fn device(&self) -> &Arc<VulkanDevice> {
        &self.ctx.device
    }

    fn resize(&mut self, width: u32, height: u32, clear_color: [f32; 4]) -> Result<()> {
        self.ctx.recreate_swapchain(width, height)?;

        let device = self.ctx.device.clone();
        self.targets.destroy(&device.device);
        self.targets = Targets::new(&device, &self.ctx, self.scene.pipeline_layout)?;
        self.images_in_flight = vec![vk::Fence::null(); self.ctx.image_count()];

        record_frames(&self.ctx, &self.scene, &self.targets, clear_color)
    }

    /// Render one frame. Returns Ok(false) when the swapchain needs
    /// recreating and nothing was drawn.
    fn render_frame(&mut self) -> Result<bool> {
        let device = &self.ctx.device;
        let sync = &self.ctx.frames[self.current_frame];

        unsafe { device.device.wait_for_fences(&[sync.in_flight_fence], true, u64::MAX) }
            .context("Failed waiting for frame fence")?;

        let (image_index, suboptimal) =
            match self.ctx.swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
                Some(acquired) => acquired,
                None => return Ok(false),
            };
        let image = image_index as usize;

        // The pre-recorded buffer for this image may still be executing
        let previous = self.images_in_flight[image];
        if previous != vk::Fence::null() && previous != sync.in_flight_fence {
            unsafe { device.device.wait_for_fences(&[previous], true, u64::MAX) }
                .context("Failed waiting for image fence")?;
        }
        self.images_in_flight[image] = sync.in_flight_fence;

        unsafe { device.device.reset_fences(&[sync.in_flight_fence]) }
            .context("Failed to reset frame fence")?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.ctx.commands.buffers[image]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], sync.in_flight_fence)
        }
        .context("Failed to submit frame")?;

        let needs_recreate = self
            .ctx
            .swapchain
            .present(device.graphics_queue, image_index, &signal_semaphores)?;

        self.current_frame = (self.current_frame + 1) % self.ctx.frames.len();
        Ok(!(needs_recreate || suboptimal))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up demo resources...");
        let device = self.ctx.device.clone();
        let _ = device.wait_idle();

        self.targets.destroy(&device.device);
        self.scene.destroy(&device.device);
        // ctx drops next and tears down the rest
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    texture_path: Option<PathBuf>,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    is_fullscreen: bool,
    needs_resize: bool,
    is_minimized: bool,

    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config, texture_path: Option<PathBuf>) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            texture_path,
            window: None,
            renderer: None,
            is_fullscreen,
            needs_resize: false,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn redraw(&mut self) -> Result<()> {
        if self.is_minimized {
            return Ok(());
        }
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return Ok(());
        };

        if self.needs_resize {
            let size = window.inner_size();
            if size.width == 0 || size.height == 0 {
                self.is_minimized = true;
                return Ok(());
            }
            renderer.resize(size.width, size.height, self.config.graphics.clear_color)?;
            self.needs_resize = false;
        }

        if renderer.render_frame()? {
            self.update_fps();
        } else {
            self.needs_resize = true;
        }
        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;
            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            self.needs_resize = true;
        }
    }

    fn save_readback(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            let device = renderer.device().clone();
            if let Err(e) = renderer.scene.save_readback(&device, Path::new("texture_readback.png")) {
                log::error!("Texture readback failed: {:#}", e);
            }
        }
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        let elapsed = self.last_fps_update.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        if let Some(ref window) = self.window {
            let fps = self.frame_count as f32 / elapsed;
            window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
        }
        self.frame_count = 0;
        self.last_fps_update = Instant::now();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&self.config, &window, self.texture_path.as_deref()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                // Drop the renderer while the window still exists
                self.renderer = None;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.is_minimized = size.width == 0 || size.height == 0;
                if !self.is_minimized {
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    log::error!("Render error: {:?}", e);
                    self.renderer = None;
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                if let PhysicalKey::Code(key) = event.physical_key {
                    match key {
                        KeyCode::Escape => {
                            log::info!("ESC pressed, exiting...");
                            self.renderer = None;
                            event_loop.exit();
                        }
                        KeyCode::F11 => self.toggle_fullscreen(),
                        KeyCode::KeyP => self.save_readback(),
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
