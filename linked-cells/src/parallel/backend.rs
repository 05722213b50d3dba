//! Communication backends (point-to-point particle exchange, reductions, barriers)

use std::sync::{self, Arc};

use anyhow::{anyhow, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};

use super::DomainDecomposition;
use crate::{grid::Face, particles::{Particle, ParticleBuffer}};

/// Transport between the processes of one run
///
/// `exchange_particles(face, outgoing)` sends `outgoing` to the neighbour
/// across `face` and returns what the neighbour across the opposite face sent
/// through its own `face`. All processes must call the collective operations
/// in the same order.
pub trait CommunicationBackend: Send + Sync {
    fn rank(&self) -> usize;

    fn num_processes(&self) -> usize;

    /// Blocking point-to-point exchange along one face
    fn exchange_particles(&self, face: Face, outgoing: Vec<Particle>) -> Result<Vec<Particle>>;

    /// Element-wise global sum; every process ends up with the same values
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()>;

    fn barrier(&self);
}

/// Sum a local particle count over all processes
pub fn global_particle_count(backend: &dyn CommunicationBackend, local_count: usize) -> Result<usize> {
    let mut values = [local_count as f64];
    backend.all_reduce_sum(&mut values)?;
    Ok(values[0].round() as usize)
}

/// Backend for a run with a single process (every face is a periodic self-neighbour)
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl SingleProcess {
    pub fn new() -> Self {
        Self
    }
}

impl CommunicationBackend for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn num_processes(&self) -> usize {
        1
    }

    fn exchange_particles(&self, _face: Face, outgoing: Vec<Particle>) -> Result<Vec<Particle>> {
        Ok(outgoing)
    }

    fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) {}
}

/// In-process backend: every rank is a thread, ranks talk through channels
///
/// Particle batches travel as `ParticleBuffer`s. Every rank has one inbox per
/// face; the neighbour across the opposite face is its only sender, so
/// messages of consecutive exchanges arrive in order.
pub struct LocalCluster {
    rank: usize,
    num_processes: usize,
    /// Neighbour rank across each face
    neighbours: [usize; 6],
    /// Inbox senders of all ranks, indexed by rank and face
    particle_senders: Arc<Vec<Vec<Sender<ParticleBuffer>>>>,
    particle_inbox: Vec<Receiver<ParticleBuffer>>,
    /// Reduction senders of all ranks, indexed by destination and source rank
    reduce_senders: Arc<Vec<Vec<Sender<Vec<f64>>>>>,
    /// One reduction inbox per source rank
    reduce_inbox: Vec<Receiver<Vec<f64>>>,
    barrier: Arc<sync::Barrier>,
}

impl LocalCluster {
    /// Create one endpoint per rank of a decomposition (endpoint `i` belongs to rank `i`)
    pub fn create(decompositions: &[DomainDecomposition]) -> Result<Vec<LocalCluster>> {
        let num = decompositions.len();
        if num == 0 {
            return Err(anyhow!("Cannot create a local cluster without processes"));
        }
        for (i, dd) in decompositions.iter().enumerate() {
            if dd.rank() != i || dd.num_processes() != num {
                return Err(anyhow!("Decomposition {} describes rank {} of {} processes, expected rank {} of {}",
                    i, dd.rank(), dd.num_processes(), i, num));
            }
        }
        let mut particle_senders = Vec::with_capacity(num);
        let mut particle_inboxes = Vec::with_capacity(num);
        for _ in 0..num {
            let (senders, receivers): (Vec<_>, Vec<_>) = (0..6).map(|_| unbounded()).unzip();
            particle_senders.push(senders);
            particle_inboxes.push(receivers);
        }
        let mut reduce_senders = Vec::with_capacity(num);
        let mut reduce_inboxes = Vec::with_capacity(num);
        for _ in 0..num {
            let (senders, receivers): (Vec<_>, Vec<_>) = (0..num).map(|_| unbounded()).unzip();
            reduce_senders.push(senders);
            reduce_inboxes.push(receivers);
        }
        let particle_senders = Arc::new(particle_senders);
        let reduce_senders = Arc::new(reduce_senders);
        let barrier = Arc::new(sync::Barrier::new(num));
        Ok(decompositions.iter()
            .zip(particle_inboxes.into_iter().zip(reduce_inboxes))
            .map(|(dd, (particle_inbox, reduce_inbox))| LocalCluster {
                rank: dd.rank(),
                num_processes: num,
                neighbours: dd.neighbour_ranks(),
                particle_senders: particle_senders.clone(),
                particle_inbox,
                reduce_senders: reduce_senders.clone(),
                reduce_inbox,
                barrier: barrier.clone(),
            })
            .collect())
    }

    pub fn neighbour(&self, face: Face) -> usize {
        self.neighbours[face.index()]
    }
}

impl CommunicationBackend for LocalCluster {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_processes(&self) -> usize {
        self.num_processes
    }

    fn exchange_particles(&self, face: Face, outgoing: Vec<Particle>) -> Result<Vec<Particle>> {
        let buffer = ParticleBuffer::encode(&outgoing)?;
        let target = self.neighbour(face);
        self.particle_senders[target][face.index()].send(buffer)
            .map_err(|_| anyhow!("Rank {} hung up before receiving particles from rank {}", target, self.rank))?;
        let incoming = self.particle_inbox[face.index()].recv()
            .map_err(|_| anyhow!("Particle channel of rank {} for face {:?} has hung up", self.rank, face))?;
        Ok(incoming.decode())
    }

    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()> {
        for target in 0..self.num_processes {
            if target != self.rank {
                self.reduce_senders[target][self.rank].send(values.to_vec())
                    .map_err(|_| anyhow!("Rank {} hung up during reduction", target))?;
            }
        }
        // Sum in rank order so every rank gets bit-identical results
        let mut sum = vec![0.0; values.len()];
        for source in 0..self.num_processes {
            let contribution = if source == self.rank {
                values.to_vec()
            }
            else {
                self.reduce_inbox[source].recv()
                    .map_err(|_| anyhow!("Rank {} hung up during reduction", source))?
            };
            if contribution.len() != values.len() {
                return Err(anyhow!("Reduction length mismatch: rank {} sent {} values, rank {} expected {}",
                    source, contribution.len(), self.rank, values.len()));
            }
            for (s, c) in sum.iter_mut().zip(contribution) {
                *s += c;
            }
        }
        values.copy_from_slice(&sum);
        Ok(())
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}
