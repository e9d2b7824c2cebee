use bytemuck::Pod;

/// Bytes staged on the CPU each submission and flushed into one growable
/// GPU buffer. Every push starts on `alignment`.
pub(crate) struct StagingBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    alignment: u64,
    pub(crate) buffer: wgpu::Buffer,
    capacity: u64,
    scratch: Vec<u8>,
}

/// Where a push landed in the staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StagedRange {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl StagedRange {
    pub(crate) fn dynamic_offset(&self) -> u32 {
        self.offset as u32
    }

    pub(crate) fn bounds(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.size
    }
}

impl StagingBuffer {
    pub(crate) fn new(
        device: &wgpu::Device,
        label: &'static str,
        usage: wgpu::BufferUsages,
        alignment: u64,
        capacity: u64,
    ) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self {
            label,
            usage,
            alignment: alignment.max(4),
            buffer: Self::allocate(device, label, usage, capacity),
            capacity,
            scratch: Vec::new(),
        }
    }

    fn allocate(
        device: &wgpu::Device,
        label: &str,
        usage: wgpu::BufferUsages,
        size: u64,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    pub(crate) fn clear(&mut self) {
        self.scratch.clear();
    }

    pub(crate) fn push<T: Pod>(&mut self, values: &[T]) -> StagedRange {
        let aligned = (self.scratch.len() as u64).div_ceil(self.alignment) * self.alignment;
        self.scratch.resize(aligned as usize, 0);
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.scratch.extend_from_slice(bytes);
        StagedRange {
            offset: aligned,
            size: bytes.len() as u64,
        }
    }

    /// Uploads the staged bytes. Returns true when the GPU buffer was
    /// replaced and bind groups over it must be rebuilt.
    pub(crate) fn flush(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        // Writes must be a multiple of four bytes.
        let required = (self.scratch.len() as u64).div_ceil(4) * 4;
        self.scratch.resize(required as usize, 0);
        let grown = required > self.capacity;
        if grown {
            let new_capacity = required.max(self.capacity * 2);
            log::info!(
                "Growing {}: {} -> {} bytes",
                self.label,
                self.capacity,
                new_capacity
            );
            self.buffer = Self::allocate(device, self.label, self.usage, new_capacity);
            self.capacity = new_capacity;
        }
        if !self.scratch.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.scratch);
        }
        grown
    }
}
