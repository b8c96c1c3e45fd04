//! The device process: kernel symbol table plus device memory.
//!
//! Models an offload target reached through a narrow handle: memory is
//! addressed by opaque device addresses, kernels are looked up by name
//! and receive a raw argument blob. A nonzero kernel return value is an
//! in-kernel failure.

use rill_utils::{Error, RillResult};
use std::collections::HashMap;

/// Opaque device memory address.
pub type DeviceAddr = u64;

/// A device kernel: raw argument blob in, status out (0 = success).
pub type Kernel = fn(&mut DeviceMemory, &[u8]) -> u64;

/// Device-resident memory, addressed by allocation.
#[derive(Default)]
pub struct DeviceMemory {
    regions: HashMap<DeviceAddr, Vec<u8>>,
    next_addr: DeviceAddr,
    capacity: usize,
    used: usize,
}

impl DeviceMemory {
    fn new(capacity: usize) -> Self {
        DeviceMemory {
            regions: HashMap::new(),
            // Address 0 stays invalid.
            next_addr: 1,
            capacity,
            used: 0,
        }
    }

    pub fn alloc(&mut self, size: usize) -> RillResult<DeviceAddr> {
        if self.used + size > self.capacity {
            return Err(Error::resource_exhausted(format!(
                "out of device memory allocating {} bytes ({} of {} in use)",
                size, self.used, self.capacity
            )));
        }
        let addr = self.next_addr;
        self.next_addr += size.max(1) as DeviceAddr;
        self.used += size;
        self.regions.insert(addr, vec![0; size]);
        log::debug!("device alloc: addr={:#x} size={}", addr, size);
        Ok(addr)
    }

    pub fn free(&mut self, addr: DeviceAddr) -> RillResult<()> {
        match self.regions.remove(&addr) {
            Some(region) => {
                self.used -= region.len();
                Ok(())
            }
            None => Err(Error::internal(format!(
                "free of unallocated device address {:#x}",
                addr
            ))),
        }
    }

    pub fn write(&mut self, addr: DeviceAddr, data: &[u8]) -> RillResult<()> {
        let region = self.region_mut(addr)?;
        if data.len() > region.len() {
            return Err(Error::internal(format!(
                "write of {} bytes overruns allocation of {} at {:#x}",
                data.len(),
                region.len(),
                addr
            )));
        }
        region[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, addr: DeviceAddr, out: &mut [u8]) -> RillResult<()> {
        let region = self.region(addr)?;
        if out.len() > region.len() {
            return Err(Error::internal(format!(
                "read of {} bytes overruns allocation of {} at {:#x}",
                out.len(),
                region.len(),
                addr
            )));
        }
        out.copy_from_slice(&region[..out.len()]);
        Ok(())
    }

    pub fn region(&self, addr: DeviceAddr) -> RillResult<&[u8]> {
        self.regions
            .get(&addr)
            .map(|r| r.as_slice())
            .ok_or_else(|| {
                Error::internal(format!("unknown device address {:#x}", addr))
            })
    }

    pub fn region_mut(&mut self, addr: DeviceAddr) -> RillResult<&mut [u8]> {
        self.regions
            .get_mut(&addr)
            .map(|r| r.as_mut_slice())
            .ok_or_else(|| {
                Error::internal(format!("unknown device address {:#x}", addr))
            })
    }
}

/// One offload target: its kernel table and its memory.
pub struct DeviceProcess {
    memory: DeviceMemory,
    kernels: HashMap<String, Kernel>,
}

impl DeviceProcess {
    pub fn create(capacity: usize, kernels: HashMap<String, Kernel>) -> Self {
        log::debug!(
            "device process created: capacity={} kernels={}",
            capacity,
            kernels.len()
        );
        DeviceProcess {
            memory: DeviceMemory::new(capacity),
            kernels,
        }
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut DeviceMemory {
        &mut self.memory
    }

    /// Dispatch kernel `name` with the given argument blob.
    pub fn call(&mut self, name: &str, arg: &[u8]) -> RillResult<()> {
        log::debug!("device call: name={}", name);
        let kernel = *self.kernels.get(name).ok_or_else(|| {
            Error::internal(format!("kernel not found: {}", name))
        })?;
        let status = kernel(&mut self.memory, arg);
        if status != 0 {
            return Err(Error::internal(format!(
                "kernel `{}' failed with status {}",
                name, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_capacity_bounded() {
        let mut mem = DeviceMemory::new(16);
        let a = mem.alloc(8).unwrap();
        let b = mem.alloc(8).unwrap();
        assert_ne!(a, b);
        assert!(mem.alloc(1).is_err());
        mem.free(a).unwrap();
        assert!(mem.alloc(4).is_ok());
    }

    #[test]
    fn unknown_kernel_is_a_typed_error() {
        let mut proc = DeviceProcess::create(64, HashMap::new());
        let err = proc.call("Nope", &[]).unwrap_err();
        assert!(err.to_string().contains("kernel not found"));
    }
}
