//! Helpers for interleaved f32 sample buffers.

// -------------------------------------------------------------------------------------------------

/// Access an interleaved buffer as fixed size frames.
pub trait InterleavedBuffer {
    /// Access the buffer as slice of `CHANNELS` sized frames. Trailing samples which don't
    /// form a complete frame are ignored.
    fn as_frames<const CHANNELS: usize>(&self) -> &[[f32; CHANNELS]];
}

/// Mutably access an interleaved buffer as fixed size frames.
pub trait InterleavedBufferMut {
    /// Access the buffer as mutable slice of `CHANNELS` sized frames. Trailing samples which
    /// don't form a complete frame are ignored.
    fn as_frames_mut<const CHANNELS: usize>(&mut self) -> &mut [[f32; CHANNELS]];
}

impl InterleavedBuffer for [f32] {
    fn as_frames<const CHANNELS: usize>(&self) -> &[[f32; CHANNELS]] {
        assert!(CHANNELS > 0, "Invalid channel count");
        let frame_count = self.len() / CHANNELS;
        // SAFETY: `[f32; CHANNELS]` has the same alignment as `f32` and a size of exactly
        // `CHANNELS` samples, and `frame_count * CHANNELS` is within the buffer's bounds.
        unsafe { std::slice::from_raw_parts(self.as_ptr() as *const [f32; CHANNELS], frame_count) }
    }
}

impl InterleavedBufferMut for [f32] {
    fn as_frames_mut<const CHANNELS: usize>(&mut self) -> &mut [[f32; CHANNELS]] {
        assert!(CHANNELS > 0, "Invalid channel count");
        let frame_count = self.len() / CHANNELS;
        // SAFETY: see `as_frames`
        unsafe {
            std::slice::from_raw_parts_mut(self.as_mut_ptr() as *mut [f32; CHANNELS], frame_count)
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Clear the given buffer by filling it with zeros.
#[inline]
pub fn clear_buffer(buffer: &mut [f32]) {
    buffer.fill(0.0);
}

/// Copy `source` into `destination`. Both buffers must have the same size.
#[inline]
pub fn copy_buffers(destination: &mut [f32], source: &[f32]) {
    debug_assert_eq!(destination.len(), source.len());
    destination.copy_from_slice(source);
}

/// Add `source` to `destination`. Both buffers must have the same size.
#[inline]
pub fn add_buffers(destination: &mut [f32], source: &[f32]) {
    debug_assert_eq!(destination.len(), source.len());
    for (d, s) in destination.iter_mut().zip(source) {
        *d += *s;
    }
}

/// Multiply all samples in the given buffer with a constant factor.
#[inline]
pub fn scale_buffer(buffer: &mut [f32], scale: f32) {
    for s in buffer.iter_mut() {
        *s *= scale;
    }
}

// -------------------------------------------------------------------------------------------------
