use std::ptr::NonNull;
use std::sync::Mutex;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocatorCreateDesc};

#[derive(Debug)]
pub enum AllocationError {
    GpuAllocator(gpu_allocator::AllocationError),
    NotMapped,
}

impl From<gpu_allocator::AllocationError> for AllocationError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Self::GpuAllocator(err)
    }
}

/// Manages memory for the host visible transient buffers.
///
/// Currently just uses the [`gpu_allocator::vulkan::Allocator`] struct.
pub struct Allocator {
    device: ash::Device,
    allocator: Mutex<gpu_allocator::vulkan::Allocator>,
}

impl Allocator {
    pub fn new(instance: ash::Instance, device: ash::Device, physical_device: vk::PhysicalDevice) -> Result<Self, AllocationError> {
        let allocator = gpu_allocator::vulkan::Allocator::new(&AllocatorCreateDesc {
            instance,
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
        })?;

        Ok(Self {
            device,
            allocator: Mutex::new(allocator),
        })
    }

    /// Allocates persistently mapped memory for `buffer`.
    pub fn allocate_mapped_buffer_memory(&self, buffer: vk::Buffer, name: &str) -> Result<Allocation, AllocationError> {
        let requirements = unsafe {
            self.device.get_buffer_memory_requirements(buffer)
        };

        let alloc_desc = AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
        };

        let alloc = self.allocator.lock().unwrap().allocate(&alloc_desc)?;
        if alloc.mapped_ptr().is_none() {
            self.allocator.lock().unwrap().free(alloc)?;
            return Err(AllocationError::NotMapped);
        }

        Ok(Allocation::new(alloc))
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(err) = self.allocator.lock().unwrap().free(allocation.alloc) {
            log::warn!("Failed to free transient allocation {:?}", err);
        }
    }
}

pub struct Allocation {
    alloc: gpu_allocator::vulkan::Allocation,
}

// The mapped pointer is only dereferenced by the owner of the buffer.
unsafe impl Send for Allocation {
}

impl Allocation {
    fn new(alloc: gpu_allocator::vulkan::Allocation) -> Self {
        Self {
            alloc,
        }
    }

    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.alloc.mapped_ptr().map(|ptr| ptr.cast())
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        unsafe { self.alloc.memory() }
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.alloc.offset()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.alloc.size()
    }
}
