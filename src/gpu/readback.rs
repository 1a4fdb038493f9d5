//! Pooled staging buffers for GPU-to-CPU image readback.
//!
//! Each detector owns a small ring (two slots in the hot paths) so CPU
//! consumption of one frame overlaps the next frame's copy. Rows are
//! padded to the 256-byte copy alignment on the GPU side and stripped
//! during resolve.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::error::{ArError, ErrorCode, Suggestion};
use crate::gpu::context::GpuContext;
use crate::gpu::resources::TrackedBuffer;

fn padded_bytes_per_row(width_bytes: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    width_bytes.div_ceil(align) * align
}

struct Slot {
    buffer: TrackedBuffer,
    in_flight: Arc<AtomicBool>,
}

/// Ring of reusable readback staging buffers for one texture shape.
pub struct ReadbackRing {
    slots: Vec<Slot>,
    next: usize,
    width_bytes: u32,
    rows: u32,
    padded: u32,
}

impl ReadbackRing {
    /// Allocate `slot_count` staging buffers sized for `width_bytes x rows`.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `BufferCreate` when allocation is
    /// rejected.
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        slot_count: usize,
        width_bytes: u32,
        rows: u32,
    ) -> Result<Self, ArError> {
        let padded = padded_bytes_per_row(width_bytes);
        let size = u64::from(padded) * u64::from(rows);
        let mut slots = Vec::with_capacity(slot_count);
        for i in 0..slot_count.max(1) {
            slots.push(Slot {
                buffer: TrackedBuffer::new(
                    ctx,
                    &format!("{label} readback {i}"),
                    size,
                    wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                )?,
                in_flight: Arc::new(AtomicBool::new(false)),
            });
        }
        Ok(Self {
            slots,
            next: 0,
            width_bytes,
            rows,
            padded,
        })
    }

    /// Unpadded bytes per row.
    #[must_use]
    pub fn width_bytes(&self) -> u32 {
        self.width_bytes
    }

    /// Rows per image.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Claim the next free slot, round-robin. `None` when every slot has a
    /// resolve outstanding (backpressure: the caller skips this frame).
    pub fn try_acquire(&mut self) -> Option<usize> {
        for offset in 0..self.slots.len() {
            let idx = (self.next + offset) % self.slots.len();
            if !self.slots[idx].in_flight.load(Ordering::Acquire) {
                self.next = (idx + 1) % self.slots.len();
                return Some(idx);
            }
        }
        None
    }

    /// Record a full-texture copy into the slot's staging buffer.
    pub fn encode_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        slot: usize,
    ) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: self.slots[slot].buffer.buffer(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded),
                    rows_per_image: Some(self.rows),
                },
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    /// Record a buffer-to-buffer copy into the slot (for storage-buffer
    /// kernel outputs; build the ring with `rows = 1` and `width_bytes`
    /// equal to the source size).
    pub fn encode_copy_buffer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Buffer,
        size: u64,
        slot: usize,
    ) {
        encoder.copy_buffer_to_buffer(
            source,
            0,
            self.slots[slot].buffer.buffer(),
            0,
            size.min(self.slots[slot].buffer.size()),
        );
    }

    /// Mark the slot in flight and produce a ticket a worker thread can
    /// resolve after submission.
    #[must_use]
    pub fn ticket(&self, slot: usize) -> ReadbackTicket {
        self.slots[slot].in_flight.store(true, Ordering::Release);
        ReadbackTicket {
            buffer: self.slots[slot].buffer.share(),
            in_flight: Arc::clone(&self.slots[slot].in_flight),
            width_bytes: self.width_bytes,
            rows: self.rows,
            padded: self.padded,
        }
    }
}

/// A pending readback: a cloned buffer handle plus layout metadata.
///
/// Resolving maps the buffer, waits for the GPU, strips row padding, and
/// unmaps. The slot is released even on failure so a GPU fault cannot
/// wedge the ring.
pub struct ReadbackTicket {
    buffer: wgpu::Buffer,
    in_flight: Arc<AtomicBool>,
    width_bytes: u32,
    rows: u32,
    padded: u32,
}

impl ReadbackTicket {
    /// Block until the copy completes and return tightly packed rows.
    ///
    /// # Errors
    ///
    /// Returns a recoverable [`ArError`] with code `GpuDeviceLost` when
    /// the map fails; the buffer is forcibly unmapped first.
    pub fn resolve(self, device: &wgpu::Device) -> Result<Vec<u8>, ArError> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::PollType::Wait);

        let map_result = rx.recv();
        let out = match map_result {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range();
                let mut packed =
                    Vec::with_capacity((self.width_bytes * self.rows) as usize);
                for row in 0..self.rows {
                    let start = (row * self.padded) as usize;
                    packed.extend_from_slice(
                        &data[start..start + self.width_bytes as usize],
                    );
                }
                drop(data);
                Ok(packed)
            }
            _ => Err(ArError::recoverable(
                ErrorCode::GpuDeviceLost,
                "buffer map for readback failed",
            )
            .with_suggestion(Suggestion::new(
                "the frame is skipped; detection resumes on the next frame",
            ))),
        };

        // Forcible release on both paths.
        self.buffer.unmap();
        self.in_flight.store(false, Ordering::Release);
        out
    }

    /// Release the slot without resolving (used when discarding work
    /// during shutdown).
    pub fn discard(self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_rounds_to_256() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(257), 512);
        assert_eq!(padded_bytes_per_row(640), 768);
        assert_eq!(padded_bytes_per_row(1280), 1280);
    }
}
