// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (delegated to instance.rs) and debug messenger
// - Physical device selection (scored, custom selectors allowed)
// - Logical device with graphics + compute queues and the feature chain
// - Memory type / format queries
// - One-shot command submission for uploads and compute

use anyhow::{Context, Result};
use ash::{vk, Entry};
use parking_lot::Mutex;
use serde::Deserialize;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::instance::{self, DebugMessenger};

/// Depth formats tried in order by `find_depth_format`
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Optional device features and swapchain capabilities requested by the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextFeatures {
    pub support_screenshots: bool,
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub vertex_pipeline_stores_and_atomics: bool,
    pub fragment_stores_and_atomics: bool,
}

impl Default for ContextFeatures {
    fn default() -> Self {
        Self {
            support_screenshots: false,
            geometry_shader: true,
            tessellation_shader: false,
            vertex_pipeline_stores_and_atomics: false,
            fragment_stores_and_atomics: false,
        }
    }
}

/// Everything `VulkanDevice::new` needs to know up front
pub struct DeviceDesc<'a> {
    pub app_name: &'a str,
    pub enable_validation: bool,
    /// Platform surface extensions (see `surface::required_extensions`)
    pub surface_extensions: Vec<*const c_char>,
    pub features: ContextFeatures,
}

/// Scores a physical device; `None` rejects it. Highest score wins.
pub type DeviceSelector =
    dyn Fn(&vk::PhysicalDeviceProperties, &vk::PhysicalDeviceFeatures) -> Option<u32>;

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    // Queue handles (the same queue twice when one family does both)
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub compute_queue: vk::Queue,
    pub compute_queue_family: u32,

    debug: DebugMessenger,

    // Pools for one-shot submissions; vkCommandPool is externally synchronized
    transfer_pool: Mutex<vk::CommandPool>,
    compute_pool: Mutex<vk::CommandPool>,

    // Cached at creation
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub features: ContextFeatures,
}

impl VulkanDevice {
    /// Create the device with the default GPU selector
    pub fn new(desc: &DeviceDesc) -> Result<Arc<Self>> {
        let features = desc.features;
        Self::with_selector(
            desc,
            &move |props: &vk::PhysicalDeviceProperties, supported: &vk::PhysicalDeviceFeatures| {
                default_device_score(props, supported, &features)
            },
        )
    }

    /// Create the device, choosing the physical device with `selector`
    pub fn with_selector(desc: &DeviceDesc, selector: &DeviceSelector) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", desc.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Instance + debug messenger
        let instance = instance::create_instance(
            &entry,
            desc.app_name,
            desc.enable_validation,
            &desc.surface_extensions,
        )?;
        let mut debug = match DebugMessenger::new(&entry, &instance, desc.enable_validation) {
            Ok(debug) => debug,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        // Step 3 + 4: Pick physical device (GPU), queue families, logical device
        let picked = pick_physical_device(&instance, selector).and_then(|(gpu, graphics, compute)| {
            create_logical_device(&instance, gpu, graphics, compute, &desc.features)
                .map(|(device, gq, cq)| (gpu, graphics, compute, device, gq, cq))
        });
        let (
            physical_device,
            graphics_queue_family,
            compute_queue_family,
            device,
            graphics_queue,
            compute_queue,
        ) = match picked {
            Ok(picked) => picked,
            Err(e) => {
                unsafe {
                    debug.destroy();
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        // Step 5: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        if graphics_queue_family != compute_queue_family {
            log::info!(
                "Separate compute queue family {} (graphics {})",
                compute_queue_family,
                graphics_queue_family
            );
        }

        // Step 6: One-shot command pools
        let pools = create_command_pool(&device, graphics_queue_family).and_then(|transfer| {
            create_command_pool(&device, compute_queue_family)
                .map(|compute| (transfer, compute))
                .map_err(|e| {
                    unsafe { device.destroy_command_pool(transfer, None) };
                    e
                })
        });
        let (transfer_pool, compute_pool) = match pools {
            Ok(pools) => pools,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    debug.destroy();
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family,
            compute_queue,
            compute_queue_family,
            debug,
            transfer_pool: Mutex::new(transfer_pool),
            compute_pool: Mutex::new(compute_pool),
            properties,
            memory_properties,
            features: desc.features,
        }))
    }

    /// Distinct queue families in use (one or two)
    pub fn queue_family_indices(&self) -> Vec<u32> {
        if self.graphics_queue_family == self.compute_queue_family {
            vec![self.graphics_queue_family]
        } else {
            vec![self.graphics_queue_family, self.compute_queue_family]
        }
    }

    pub fn has_separate_compute_queue(&self) -> bool {
        self.graphics_queue_family != self.compute_queue_family
    }

    /// Memory type index matching `type_bits` with all of `flags`
    pub fn memory_type_index(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
            .with_context(|| format!("No memory type with {:?} in mask {:#b}", flags, type_bits))
    }

    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        select_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        })
        .with_context(|| format!("No supported format among {:?}", candidates))
    }

    pub fn find_depth_format(&self) -> Result<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_usable_sample_count(&self.properties.limits)
    }

    /// Name a handle for validation output. Failures are logged, not returned.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        if let Err(e) = self.debug.set_object_name(&self.device, handle, name) {
            log::debug!("Could not name {:?} '{}': {}", H::TYPE, name, e);
        }
    }

    // =========================================================================
    // ONE-SHOT COMMANDS
    // =========================================================================

    /// Allocate a primary command buffer and begin it for one-time submit.
    /// Pair with `end_single_time_commands` on the same thread.
    pub fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        let pool = self.transfer_pool.lock();
        let cmd = allocate_one(&self.device, *pool)?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { self.device.begin_command_buffer(cmd, &begin_info) } {
            unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
            return Err(e).context("Failed to begin one-shot command buffer");
        }
        Ok(cmd)
    }

    /// End, submit to the graphics queue, wait for idle and free.
    pub fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let pool = self.transfer_pool.lock();
        let result = unsafe { self.device.end_command_buffer(cmd) }
            .context("Failed to end one-shot command buffer")
            .and_then(|_| submit_and_wait(&self.device, self.graphics_queue, cmd));
        unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
        result
    }

    /// Record with `record` and run synchronously on the graphics queue
    pub fn execute_single_time<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        run_one_shot(&self.device, &self.transfer_pool, self.graphics_queue, record)
    }

    /// Same as `execute_single_time` but on the compute queue
    pub fn execute_single_time_compute<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        run_one_shot(&self.device, &self.compute_pool, self.compute_queue, record)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_command_pool(*self.compute_pool.get_mut(), None);
            self.device.destroy_command_pool(*self.transfer_pool.get_mut(), None);
            self.device.destroy_device(None);
            self.debug.destroy();
            self.instance.destroy_instance(None);
        }
    }
}

// =============================================================================
// SELECTION
// =============================================================================

/// Default scoring: every core feature we enable must be present, plus any
/// optional feature the app asked for; discrete GPUs beat integrated ones.
pub fn default_device_score(
    props: &vk::PhysicalDeviceProperties,
    supported: &vk::PhysicalDeviceFeatures,
    wanted: &ContextFeatures,
) -> Option<u32> {
    if props.api_version < vk::API_VERSION_1_2 {
        return None;
    }

    let required = core_features(wanted);
    if !features_supported(&required, supported) {
        return None;
    }

    Some(match props.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    })
}

/// Core features enabled on the logical device
pub fn core_features(wanted: &ContextFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::builder()
        .multi_draw_indirect(true)
        .draw_indirect_first_instance(true)
        .fill_mode_non_solid(true)
        .sampler_anisotropy(true)
        .shader_sampled_image_array_dynamic_indexing(true)
        .shader_int64(true)
        .geometry_shader(wanted.geometry_shader)
        .tessellation_shader(wanted.tessellation_shader)
        .vertex_pipeline_stores_and_atomics(wanted.vertex_pipeline_stores_and_atomics)
        .fragment_stores_and_atomics(wanted.fragment_stores_and_atomics)
        .build()
}

fn features_supported(
    required: &vk::PhysicalDeviceFeatures,
    supported: &vk::PhysicalDeviceFeatures,
) -> bool {
    let pairs = [
        (required.multi_draw_indirect, supported.multi_draw_indirect),
        (required.draw_indirect_first_instance, supported.draw_indirect_first_instance),
        (required.fill_mode_non_solid, supported.fill_mode_non_solid),
        (required.sampler_anisotropy, supported.sampler_anisotropy),
        (
            required.shader_sampled_image_array_dynamic_indexing,
            supported.shader_sampled_image_array_dynamic_indexing,
        ),
        (required.shader_int64, supported.shader_int64),
        (required.geometry_shader, supported.geometry_shader),
        (required.tessellation_shader, supported.tessellation_shader),
        (
            required.vertex_pipeline_stores_and_atomics,
            supported.vertex_pipeline_stores_and_atomics,
        ),
        (required.fragment_stores_and_atomics, supported.fragment_stores_and_atomics),
    ];
    pairs
        .iter()
        .all(|&(req, sup)| req == vk::FALSE || sup == vk::TRUE)
}

/// First family with at least one queue and any of `flags`
pub fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.intersects(flags))
        .map(|i| i as u32)
}

fn pick_physical_device(
    instance: &ash::Instance,
    selector: &DeviceSelector,
) -> Result<(vk::PhysicalDevice, u32, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    let mut best: Option<(u32, vk::PhysicalDevice, u32, u32)> = None;

    for device in devices {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };

        let Some(score) = selector(&props, &features) else {
            continue;
        };

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let (Some(graphics), Some(compute)) = (
            find_queue_family(&families, vk::QueueFlags::GRAPHICS),
            find_queue_family(&families, vk::QueueFlags::COMPUTE),
        ) else {
            continue;
        };

        if best.map_or(true, |(best_score, ..)| score > best_score) {
            best = Some((score, device, graphics, compute));
        }
    }

    best.map(|(_, device, graphics, compute)| (device, graphics, compute))
        .ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    compute_queue_family: u32,
    wanted: &ContextFeatures,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [0.0];
    let mut queue_infos = vec![vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)
        .build()];
    if compute_queue_family != graphics_queue_family {
        queue_infos.push(
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(compute_queue_family)
                .queue_priorities(&queue_priorities)
                .build(),
        );
    }

    let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];

    let mut features2 = vk::PhysicalDeviceFeatures2::builder()
        .features(core_features(wanted))
        .build();
    let mut features11 = vk::PhysicalDeviceVulkan11Features::builder()
        .shader_draw_parameters(true)
        .build();
    let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
        .timeline_semaphore(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .runtime_descriptor_array(true)
        .build();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut features2)
        .push_next(&mut features11)
        .push_next(&mut features12);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("Failed to create logical device")?;

    let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
    let compute_queue = unsafe { device.get_device_queue(compute_queue_family, 0) };

    Ok((device, graphics_queue, compute_queue))
}

// =============================================================================
// QUERIES
// =============================================================================

/// Find a suitable memory type index
pub fn find_memory_type(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem_properties.memory_type_count).find(|&i| {
        let has_type = (type_bits & (1 << i)) != 0;
        has_type
            && mem_properties.memory_types[i as usize]
                .property_flags
                .contains(flags)
    })
}

/// First candidate whose tiling features contain `features`
pub fn select_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    query: F,
) -> Option<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    candidates.iter().copied().find(|&format| {
        let props = query(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT
}

/// Highest sample count usable for both colour and depth framebuffers
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&c| counts.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

// =============================================================================
// COMMAND HELPERS
// =============================================================================

pub(crate) fn create_command_pool(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.context("Failed to create command pool")
}

fn allocate_one(device: &ash::Device, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffer")?;
    buffers
        .into_iter()
        .next()
        .context("Driver returned no command buffer")
}

fn submit_and_wait(device: &ash::Device, queue: vk::Queue, cmd: vk::CommandBuffer) -> Result<()> {
    let command_buffers = [cmd];
    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

    unsafe {
        device
            .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
            .context("Failed to submit one-shot commands")?;
        device
            .queue_wait_idle(queue)
            .context("Failed waiting for queue idle")?;
    }
    Ok(())
}

fn run_one_shot<F>(
    device: &ash::Device,
    pool: &Mutex<vk::CommandPool>,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    // Held across recording: the pool may not be used from two threads at once
    let pool = pool.lock();
    let cmd = allocate_one(device, *pool)?;

    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let result = unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .context("Failed to begin one-shot command buffer")
        .and_then(|_| record(cmd))
        .and_then(|_| {
            unsafe { device.end_command_buffer(cmd) }
                .context("Failed to end one-shot command buffer")
        })
        .and_then(|_| submit_and_wait(device, queue, cmd));

    unsafe { device.free_command_buffers(*pool, &[cmd]) };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_type_bits_and_flags() {
        let props = memory_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b111, host), Some(2));
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(1));
        assert_eq!(find_memory_type(&props, 0b011, host), None);
        assert_eq!(find_memory_type(&props, 0b001, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
    }

    #[test]
    fn queue_family_skips_empty_and_unrelated_families() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS,
                queue_count: 0,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 2,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            },
        ];

        assert_eq!(find_queue_family(&families, vk::QueueFlags::GRAPHICS), Some(2));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(2));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::SPARSE_BINDING), None);
    }

    #[test]
    fn compute_family_is_the_first_match_not_a_dedicated_one() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::COMPUTE,
                queue_count: 4,
                ..Default::default()
            },
        ];

        assert_eq!(find_queue_family(&families, vk::QueueFlags::GRAPHICS), Some(0));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(0));
    }

    #[test]
    fn sample_count_is_highest_common_bit() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn depth_format_selection_uses_tiling_features() {
        let query = |format: vk::Format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties {
                    linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            }
        };

        let optimal = select_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        );
        assert_eq!(optimal, Some(vk::Format::D24_UNORM_S8_UINT));

        let linear = select_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        );
        assert_eq!(linear, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn stencil_formats() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    fn full_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::builder()
            .multi_draw_indirect(true)
            .draw_indirect_first_instance(true)
            .fill_mode_non_solid(true)
            .sampler_anisotropy(true)
            .shader_sampled_image_array_dynamic_indexing(true)
            .shader_int64(true)
            .geometry_shader(true)
            .build()
    }

    fn props(device_type: vk::PhysicalDeviceType) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_3,
            device_type,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_outscores_integrated() {
        let wanted = ContextFeatures::default();
        let discrete = default_device_score(
            &props(vk::PhysicalDeviceType::DISCRETE_GPU),
            &full_features(),
            &wanted,
        );
        let integrated = default_device_score(
            &props(vk::PhysicalDeviceType::INTEGRATED_GPU),
            &full_features(),
            &wanted,
        );
        assert!(discrete > integrated);
        assert!(integrated.is_some());
    }

    #[test]
    fn missing_requested_feature_rejects_device() {
        let wanted = ContextFeatures {
            tessellation_shader: true,
            ..Default::default()
        };
        let score = default_device_score(
            &props(vk::PhysicalDeviceType::DISCRETE_GPU),
            &full_features(),
            &wanted,
        );
        assert_eq!(score, None);
    }

    #[test]
    fn old_api_version_rejected() {
        let mut old = props(vk::PhysicalDeviceType::DISCRETE_GPU);
        old.api_version = vk::API_VERSION_1_1;
        assert_eq!(
            default_device_score(&old, &full_features(), &ContextFeatures::default()),
            None
        );
    }

    #[test]
    fn optional_features_follow_the_request() {
        let off = core_features(&ContextFeatures {
            geometry_shader: false,
            ..Default::default()
        });
        assert_eq!(off.geometry_shader, vk::FALSE);
        assert_eq!(off.sampler_anisotropy, vk::TRUE);

        let on = core_features(&ContextFeatures {
            tessellation_shader: true,
            fragment_stores_and_atomics: true,
            ..Default::default()
        });
        assert_eq!(on.tessellation_shader, vk::TRUE);
        assert_eq!(on.fragment_stores_and_atomics, vk::TRUE);
        assert_eq!(on.vertex_pipeline_stores_and_atomics, vk::FALSE);
    }
}
