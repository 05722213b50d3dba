//! Byte buffers for moving particle batches between processes

use aligned_box::AlignedBox;
use anyhow::{anyhow, Result};

use super::Particle;

// 32 bytes is enough for AVX2 loads straight out of a received buffer
const ALIGNMENT: usize = 32;

/// Aligned byte representation of a batch of particles
///
/// This is what a communication backend moves around. The alignment allows
/// the receiving side to reinterpret the bytes as particles in place.
pub struct ParticleBuffer {
    /// Number of particles in the buffer
    count: usize,
    /// Raw particle bytes (at least one alignment unit, even when empty)
    data: AlignedBox<[u8]>,
}

impl ParticleBuffer {
    /// Encode a batch of particles
    pub fn encode(particles: &[Particle]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(particles);
        let mut data = AlignedBox::slice_from_value(ALIGNMENT, bytes.len().max(ALIGNMENT), 0u8)
            .map_err(|e| anyhow!("Cannot allocate particle buffer for {} particles: {}", particles.len(), e))?;
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            count: particles.len(),
            data
        })
    }

    /// Number of particles in the buffer
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of the payload in bytes
    pub fn byte_len(&self) -> usize {
        self.count * std::mem::size_of::<Particle>()
    }

    /// View the buffer as particles without copying
    pub fn as_particles(&self) -> &[Particle] {
        bytemuck::cast_slice(&self.data[..self.byte_len()])
    }

    /// Decode into an owned particle batch
    pub fn decode(&self) -> Vec<Particle> {
        self.as_particles().to_vec()
    }
}
