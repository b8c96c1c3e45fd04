//! Device context strategies.
//!
//! One capability interface covers every variant: [`DirectContext`]
//! dispatches synchronously, [`BatchedContext`] queues dispatches and
//! coalesces them on synchronize, and [`LockedContext`] is a mutual-
//! exclusion decorator over either. The strategy is chosen once, at
//! construction, by the caller-owned [`DeviceExecutor`].

use crate::kernels::builtin_kernel_table;
use crate::process::{DeviceAddr, DeviceProcess};
use rill_utils::{Error, RillResult};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex;

/// The capability interface every device context implements.
pub trait DeviceInterface {
    /// Run (or enqueue) the named kernel with a raw argument blob.
    fn compute(&self, name: &str, arg: &[u8]) -> RillResult<()>;
    /// Copy host memory into a device allocation.
    fn copy_to_device(&self, addr: DeviceAddr, data: &[u8]) -> RillResult<()>;
    /// Copy a device allocation back to host memory. Queued work must
    /// be drained first.
    fn copy_from_device(&self, addr: DeviceAddr, out: &mut [u8]) -> RillResult<()>;
    /// Drain all queued work. A no-op for synchronous strategies.
    fn synchronize(&self) -> RillResult<()>;
}

/// Synchronous dispatch: every compute call reaches the device before
/// returning.
pub struct DirectContext {
    process: Rc<RefCell<DeviceProcess>>,
}

impl DirectContext {
    pub fn new(process: Rc<RefCell<DeviceProcess>>) -> Self {
        DirectContext { process }
    }
}

impl DeviceInterface for DirectContext {
    fn compute(&self, name: &str, arg: &[u8]) -> RillResult<()> {
        self.process.borrow_mut().call(name, arg)
    }

    fn copy_to_device(&self, addr: DeviceAddr, data: &[u8]) -> RillResult<()> {
        self.process.borrow_mut().memory_mut().write(addr, data)
    }

    fn copy_from_device(&self, addr: DeviceAddr, out: &mut [u8]) -> RillResult<()> {
        self.process.borrow().memory().read(addr, out)
    }

    fn synchronize(&self) -> RillResult<()> {
        Ok(())
    }
}

/// Batched dispatch: compute calls enqueue; `synchronize` drains the
/// queue in FIFO order as one coalesced device interaction.
pub struct BatchedContext {
    process: Rc<RefCell<DeviceProcess>>,
    queue: RefCell<VecDeque<(String, Vec<u8>)>>,
}

impl BatchedContext {
    pub fn new(process: Rc<RefCell<DeviceProcess>>) -> Self {
        BatchedContext {
            process,
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Number of dispatches waiting for the next synchronize.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl DeviceInterface for BatchedContext {
    fn compute(&self, name: &str, arg: &[u8]) -> RillResult<()> {
        self.queue
            .borrow_mut()
            .push_back((name.to_string(), arg.to_vec()));
        Ok(())
    }

    fn copy_to_device(&self, addr: DeviceAddr, data: &[u8]) -> RillResult<()> {
        self.process.borrow_mut().memory_mut().write(addr, data)
    }

    fn copy_from_device(&self, addr: DeviceAddr, out: &mut [u8]) -> RillResult<()> {
        if !self.queue.borrow().is_empty() {
            return Err(Error::failed_precondition(
                "device memory read with dispatches still queued; synchronize first",
            ));
        }
        self.process.borrow().memory().read(addr, out)
    }

    fn synchronize(&self) -> RillResult<()> {
        let drained: Vec<_> = self.queue.borrow_mut().drain(..).collect();
        if drained.is_empty() {
            return Ok(());
        }
        log::debug!("draining {} queued dispatches", drained.len());
        let mut process = self.process.borrow_mut();
        for (name, arg) in drained {
            process.call(&name, &arg)?;
        }
        Ok(())
    }
}

/// Mutual-exclusion decorator: wraps any other context and serializes
/// every call through one lock.
pub struct LockedContext<C: DeviceInterface> {
    inner: Mutex<C>,
}

impl<C: DeviceInterface> LockedContext<C> {
    pub fn new(inner: C) -> Self {
        LockedContext {
            inner: Mutex::new(inner),
        }
    }

    fn locked<T>(&self, f: impl FnOnce(&C) -> RillResult<T>) -> RillResult<T> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| Error::internal("device context lock poisoned"))?;
        f(&guard)
    }
}

impl<C: DeviceInterface> DeviceInterface for LockedContext<C> {
    fn compute(&self, name: &str, arg: &[u8]) -> RillResult<()> {
        self.locked(|c| c.compute(name, arg))
    }

    fn copy_to_device(&self, addr: DeviceAddr, data: &[u8]) -> RillResult<()> {
        self.locked(|c| c.copy_to_device(addr, data))
    }

    fn copy_from_device(&self, addr: DeviceAddr, out: &mut [u8]) -> RillResult<()> {
        self.locked(|c| c.copy_from_device(addr, out))
    }

    fn synchronize(&self) -> RillResult<()> {
        self.locked(|c| c.synchronize())
    }
}

/// How a [`DeviceExecutor`] dispatches and guards its context.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExecutorOptions {
    pub memory_capacity: usize,
    pub batched: bool,
    pub locked: bool,
}

/// Caller-owned handle to one offload device: the process, its memory,
/// and the chosen context strategy. Created once during setup and torn
/// down when dropped; there is no global instance.
pub struct DeviceExecutor {
    process: Rc<RefCell<DeviceProcess>>,
    context: Box<dyn DeviceInterface>,
}

impl DeviceExecutor {
    pub fn create(options: ExecutorOptions) -> Self {
        let capacity = if options.memory_capacity == 0 {
            // Default working set for tests and small runs.
            1 << 20
        } else {
            options.memory_capacity
        };
        let process = Rc::new(RefCell::new(DeviceProcess::create(
            capacity,
            builtin_kernel_table(),
        )));
        let context: Box<dyn DeviceInterface> = match (options.batched, options.locked) {
            (false, false) => Box::new(DirectContext::new(Rc::clone(&process))),
            (true, false) => Box::new(BatchedContext::new(Rc::clone(&process))),
            (false, true) => {
                Box::new(LockedContext::new(DirectContext::new(Rc::clone(&process))))
            }
            (true, true) => {
                Box::new(LockedContext::new(BatchedContext::new(Rc::clone(&process))))
            }
        };
        DeviceExecutor { process, context }
    }

    pub fn context(&self) -> &dyn DeviceInterface {
        self.context.as_ref()
    }

    pub fn alloc(&self, size: usize) -> RillResult<DeviceAddr> {
        self.process.borrow_mut().memory_mut().alloc(size)
    }

    pub fn free(&self, addr: DeviceAddr) -> RillResult<()> {
        self.process.borrow_mut().memory_mut().free(addr)
    }
}

impl Drop for DeviceExecutor {
    fn drop(&mut self) {
        log::debug!("device executor torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn pack(words: &[u64]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn direct_compute_round_trip() {
        let exec = DeviceExecutor::create(ExecutorOptions::default());
        let input = exec.alloc(8).unwrap();
        let output = exec.alloc(8).unwrap();
        let host: Vec<u8> = [-2.0f32, 5.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        exec.context().copy_to_device(input, &host).unwrap();
        exec.context()
            .compute("Relu", &pack(&[input, output, 2]))
            .unwrap();
        exec.context().synchronize().unwrap();
        let mut back = [0u8; 8];
        exec.context().copy_from_device(output, &mut back).unwrap();
        assert_eq!(f32s(&back), vec![0.0, 5.0]);
    }

    #[test]
    fn batched_compute_requires_synchronize() {
        let exec = DeviceExecutor::create(ExecutorOptions {
            batched: true,
            ..ExecutorOptions::default()
        });
        let input = exec.alloc(4).unwrap();
        let output = exec.alloc(4).unwrap();
        let host = 3.0f32.to_le_bytes();
        exec.context().copy_to_device(input, &host).unwrap();
        exec.context()
            .compute("Relu", &pack(&[input, output, 1]))
            .unwrap();

        let mut back = [0u8; 4];
        // Reading before the drain is a contract violation.
        assert!(exec.context().copy_from_device(output, &mut back).is_err());
        exec.context().synchronize().unwrap();
        exec.context().copy_from_device(output, &mut back).unwrap();
        assert_eq!(f32s(&back), vec![3.0]);
    }

    #[test]
    fn locked_decorator_delegates() {
        let exec = DeviceExecutor::create(ExecutorOptions {
            locked: true,
            ..ExecutorOptions::default()
        });
        let input = exec.alloc(4).unwrap();
        let output = exec.alloc(4).unwrap();
        exec.context()
            .copy_to_device(input, &(-1.0f32).to_le_bytes())
            .unwrap();
        exec.context()
            .compute("Relu", &pack(&[input, output, 1]))
            .unwrap();
        let mut back = [0u8; 4];
        exec.context().copy_from_device(output, &mut back).unwrap();
        assert_eq!(f32s(&back), vec![0.0]);
    }
}
