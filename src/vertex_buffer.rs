use crate::{
    context::{BufferHandle, RenderContext},
    error::{Result, TextError},
};

/// A vertex buffer that grows to fit the largest payload written so far and never shrinks.
///
/// Growing replaces the buffer with one of exactly the requested size and binds the new one to
/// the context's vertex buffer slot. Contents are not preserved between uploads.
#[derive(Debug, Default)]
pub struct DynamicVertexBuffer {
    handle: Option<BufferHandle>,
    capacity: u64,
    allocations: usize,
}

impl DynamicVertexBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// How many times GPU memory has been allocated for this buffer.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Makes sure the buffer can hold `size` bytes. Returns true when a new buffer was created.
    pub fn reserve<C: RenderContext + ?Sized>(
        &mut self,
        context: &mut C,
        size: u64,
    ) -> Result<bool> {
        if size == 0 || (size <= self.capacity && self.handle.is_some()) {
            return Ok(false);
        }
        if let Some(old) = self.handle.take() {
            context.release_buffer(old);
        }
        self.capacity = 0;

        let handle = context.create_vertex_buffer(size)?;
        log::debug!("text vertex buffer reallocated to {size} bytes");
        context.set_vertex_buffer(Some(handle));
        self.handle = Some(handle);
        self.capacity = size;
        self.allocations += 1;
        Ok(true)
    }

    /// Writes `bytes` with discard semantics, growing first if needed, and returns the buffer
    /// that now holds them. An empty payload touches nothing and returns `None`.
    pub fn upload<C: RenderContext + ?Sized>(
        &mut self,
        context: &mut C,
        bytes: &[u8],
    ) -> Result<Option<BufferHandle>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        self.reserve(context, bytes.len() as u64)?;
        let handle = self
            .handle
            .ok_or(TextError::Device("vertex buffer missing after reserve".into()))?;
        context.write_buffer(handle, bytes)?;
        Ok(Some(handle))
    }

    pub fn release<C: RenderContext + ?Sized>(&mut self, context: &mut C) {
        if let Some(handle) = self.handle.take() {
            context.release_buffer(handle);
        }
        self.capacity = 0;
    }
}
