use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Process-wide concurrency pools. Every filesystem read/write and every
/// CPU-heavy parse acquires a permit from the matching pool; admission is
/// FIFO (tokio semaphores queue waiters in order).
pub struct Pools {
    read: Semaphore,
    write: Semaphore,
    cpu: Semaphore,
    read_limit: usize,
    write_limit: usize,
    cpu_limit: usize,
}

impl Pools {
    /// Sizes follow the host: read = min(cpus × 2, 8), write = 2,
    /// cpu = max(cpus − 1, 1).
    pub fn initialize() -> Arc<Self> {
        let cpus = num_cpus::get();
        let read_limit = (cpus * 2).min(8).max(1);
        let write_limit = 2;
        let cpu_limit = cpus.saturating_sub(1).max(1);
        Arc::new(Self {
            read: Semaphore::new(read_limit),
            write: Semaphore::new(write_limit),
            cpu: Semaphore::new(cpu_limit),
            read_limit,
            write_limit,
            cpu_limit,
        })
    }

    pub async fn read(&self) -> SemaphorePermit<'_> {
        self.read.acquire().await.expect("read pool disposed")
    }

    pub async fn write(&self) -> SemaphorePermit<'_> {
        self.write.acquire().await.expect("write pool disposed")
    }

    pub async fn cpu(&self) -> SemaphorePermit<'_> {
        self.cpu.acquire().await.expect("cpu pool disposed")
    }

    /// Closing the semaphores makes later acquires panic loudly instead of
    /// hanging; callers are expected to stop submitting work first.
    pub fn dispose(&self) {
        self.read.close();
        self.write.close();
        self.cpu.close();
    }

    pub fn read_limit(&self) -> usize {
        self.read_limit
    }

    pub fn write_limit(&self) -> usize {
        self.write_limit
    }

    pub fn cpu_limit(&self) -> usize {
        self.cpu_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_follow_spec() {
        let pools = Pools::initialize();
        let cpus = num_cpus::get();
        assert_eq!(pools.read_limit(), (cpus * 2).min(8).max(1));
        assert_eq!(pools.write_limit(), 2);
        assert_eq!(pools.cpu_limit(), cpus.saturating_sub(1).max(1));
    }

    #[tokio::test]
    async fn write_pool_bounds_concurrency() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pools = Pools::initialize();
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pools = pools.clone();
                let peak = peak.clone();
                let current = current.clone();
                tokio::spawn(async move {
                    let _permit = pools.write().await;
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
