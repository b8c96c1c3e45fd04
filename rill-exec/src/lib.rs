//! The device-offload executor: a named-kernel dispatch interface with
//! host/device memory transfer and explicit synchronization.
//!
//! This subsystem is peripheral to the importer; it consumes operations
//! as "a name, an argument blob, and a length" and knows nothing about
//! the IR. One capability interface covers all variants: a synchronous
//! strategy, a batching strategy that coalesces queued dispatches, and
//! a locking decorator over either.

mod device;
mod kernels;
mod process;

pub use device::{
    BatchedContext, DeviceExecutor, DeviceInterface, DirectContext, ExecutorOptions,
    LockedContext,
};
pub use kernels::builtin_kernel_table;
pub use process::{DeviceAddr, DeviceMemory, DeviceProcess, Kernel};
