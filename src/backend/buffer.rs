// Buffer utilities for vertex, index, storage and uniform buffers
//
// Raw VkDeviceMemory per buffer, memory type picked with find_memory_type.
// Host-visible buffers are expected to be HOST_COHERENT (no explicit flushes).

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;

use super::VulkanDevice;

/// A buffer and the memory bound to it
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// Exclusive-sharing buffer
    pub fn new(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        Self::create(device, size, usage, memory_flags, &[])
    }

    /// Buffer usable from both the graphics and the compute family.
    /// Falls back to exclusive sharing when they are the same family.
    pub fn new_shared(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        Self::create(device, size, usage, memory_flags, &device.queue_family_indices())
    }

    /// Host-visible uniform buffer
    pub fn uniform(device: &VulkanDevice, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Host-visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        device: &VulkanDevice,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        if let Err(e) = buffer.upload(device, 0, bytes) {
            buffer.destroy(&device.device);
            return Err(e);
        }
        Ok(buffer)
    }

    fn create(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        queue_families: &[u32],
    ) -> Result<Self> {
        if size == 0 {
            anyhow::bail!("Cannot create a zero-sized buffer ({:?})", usage);
        }

        let (sharing_mode, families) = sharing_for(queue_families);
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(families);

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };

        let memory = device
            .memory_type_index(mem_requirements.memory_type_bits, memory_flags)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(mem_requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.device.allocate_memory(&alloc_info, None) }
                    .context("Failed to allocate buffer memory")
            });

        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.device.bind_buffer_memory(handle, memory, 0) } {
            unsafe {
                device.device.destroy_buffer(handle, None);
                device.device.free_memory(memory, None);
            }
            return Err(e).context("Failed to bind buffer memory");
        }

        Ok(Self { handle, memory, size })
    }

    /// Copy `data` into the mapped range `[offset, offset + len)`
    pub fn upload(&self, device: &VulkanDevice, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_range(self.size, offset, data.len())?;

        unsafe {
            let ptr = device
                .device
                .map_memory(
                    self.memory,
                    offset,
                    data.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .context("Failed to map buffer memory")? as *mut u8;

            ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
            device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Typed convenience over `upload`
    pub fn upload_pod<T: Pod>(
        &self,
        device: &VulkanDevice,
        offset: vk::DeviceSize,
        data: &[T],
    ) -> Result<()> {
        self.upload(device, offset, bytemuck::cast_slice(data))
    }

    /// Copy the mapped range `[offset, offset + out.len())` into `out`
    pub fn download(&self, device: &VulkanDevice, offset: vk::DeviceSize, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        check_range(self.size, offset, out.len())?;

        unsafe {
            let ptr = device
                .device
                .map_memory(
                    self.memory,
                    offset,
                    out.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .context("Failed to map buffer memory")? as *const u8;

            ptr.copy_to_nonoverlapping(out.as_mut_ptr(), out.len());
            device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.handle, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// CONCURRENT sharing only makes sense with two or more distinct families
pub fn sharing_for(queue_families: &[u32]) -> (vk::SharingMode, &[u32]) {
    if queue_families.len() > 1 {
        (vk::SharingMode::CONCURRENT, queue_families)
    } else {
        (vk::SharingMode::EXCLUSIVE, &[])
    }
}

fn check_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> Result<()> {
    let end = offset
        .checked_add(len as vk::DeviceSize)
        .context("Buffer range overflows")?;
    if end > size {
        anyhow::bail!(
            "Range {}..{} is outside the buffer ({} bytes)",
            offset,
            end,
            size
        );
    }
    Ok(())
}

/// vkCmdCopyBuffer through a one-shot command buffer
pub fn copy_buffer(
    device: &VulkanDevice,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    device.execute_single_time(|cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { device.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        Ok(())
    })
}

/// Device-local buffer holding vertices followed by indices
#[derive(Debug, Clone, Copy)]
pub struct GeometryBuffer {
    pub buffer: Buffer,
    pub vertex_size: vk::DeviceSize,
    pub index_size: vk::DeviceSize,
}

impl GeometryBuffer {
    /// Offset of the first index, for vkCmdBindIndexBuffer
    pub fn index_offset(&self) -> vk::DeviceSize {
        self.vertex_size
    }

    pub fn destroy(&self, device: &ash::Device) {
        self.buffer.destroy(device);
    }
}

/// Upload vertex + index bytes through a staging buffer into one device-local
/// buffer usable as vertex, index and storage buffer.
pub fn allocate_vertex_buffer(
    device: &VulkanDevice,
    vertex_data: &[u8],
    index_data: &[u8],
) -> Result<GeometryBuffer> {
    let vertex_size = vertex_data.len() as vk::DeviceSize;
    let index_size = index_data.len() as vk::DeviceSize;
    let total = vertex_size + index_size;

    let staging = Buffer::new(
        device,
        total,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let result = staging
        .upload(device, 0, vertex_data)
        .and_then(|_| staging.upload(device, vertex_size, index_data))
        .and_then(|_| {
            Buffer::new(
                device,
                total,
                vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::INDEX_BUFFER,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        })
        .and_then(|buffer| match copy_buffer(device, staging.handle, buffer.handle, total) {
            Ok(()) => Ok(buffer),
            Err(e) => {
                buffer.destroy(&device.device);
                Err(e)
            }
        });

    staging.destroy(&device.device);

    let buffer = result?;
    log::debug!(
        "Uploaded geometry: {} vertex bytes + {} index bytes",
        vertex_size,
        index_size
    );

    Ok(GeometryBuffer {
        buffer,
        vertex_size,
        index_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_must_fit_buffer() {
        assert!(check_range(64, 0, 64).is_ok());
        assert!(check_range(64, 60, 4).is_ok());
        assert!(check_range(64, 60, 5).is_err());
        assert!(check_range(64, u64::MAX, 1).is_err());
    }

    #[test]
    fn single_family_stays_exclusive() {
        let (mode, families) = sharing_for(&[0]);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());
    }

    #[test]
    fn two_families_share_concurrently() {
        let (mode, families) = sharing_for(&[0, 2]);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, &[0, 2]);
    }

    #[test]
    fn geometry_index_offset_follows_vertices() {
        let geometry = GeometryBuffer {
            buffer: Buffer {
                handle: vk::Buffer::null(),
                memory: vk::DeviceMemory::null(),
                size: 96,
            },
            vertex_size: 80,
            index_size: 16,
        };
        assert_eq!(geometry.index_offset(), 80);
    }
}
