//! Builtin device kernels.
//!
//! Argument blobs are packed little-endian: each kernel documents its
//! own layout. Status 0 is success; anything else is surfaced by the
//! caller as an in-kernel failure.

use crate::process::{DeviceAddr, DeviceMemory, Kernel};
use std::collections::HashMap;

/// Argument layout shared by the elementwise kernels:
/// `[in: u64][out: u64][count: u64]`.
fn unpack_unary(arg: &[u8]) -> Option<(DeviceAddr, DeviceAddr, usize)> {
    if arg.len() != 24 {
        return None;
    }
    let word = |i: usize| u64::from_le_bytes(arg[i * 8..(i + 1) * 8].try_into().unwrap());
    Some((word(0), word(1), word(2) as usize))
}

fn read_f32s(mem: &DeviceMemory, addr: DeviceAddr, count: usize) -> Option<Vec<f32>> {
    let region = mem.region(addr).ok()?;
    if region.len() < count * 4 {
        return None;
    }
    Some(
        region[..count * 4]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect(),
    )
}

fn write_f32s(mem: &mut DeviceMemory, addr: DeviceAddr, values: &[f32]) -> Option<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    mem.write(addr, &bytes).ok()
}

/// `max(x, 0)` elementwise over f32 buffers.
fn relu(mem: &mut DeviceMemory, arg: &[u8]) -> u64 {
    let Some((input, output, count)) = unpack_unary(arg) else {
        return 1;
    };
    let Some(values) = read_f32s(mem, input, count) else {
        return 2;
    };
    let result: Vec<f32> = values.iter().map(|&v| v.max(0.0)).collect();
    if write_f32s(mem, output, &result).is_none() {
        return 3;
    }
    0
}

/// Gradient of relu: `[grad: u64][features: u64][out: u64][count: u64]`;
/// passes the gradient through where the feature was positive.
fn relu_grad(mem: &mut DeviceMemory, arg: &[u8]) -> u64 {
    if arg.len() != 32 {
        return 1;
    }
    let word = |i: usize| u64::from_le_bytes(arg[i * 8..(i + 1) * 8].try_into().unwrap());
    let (grad, features, output, count) =
        (word(0), word(1), word(2), word(3) as usize);
    let (Some(g), Some(f)) = (read_f32s(mem, grad, count), read_f32s(mem, features, count))
    else {
        return 2;
    };
    let result: Vec<f32> = g
        .iter()
        .zip(f.iter())
        .map(|(&g, &f)| if f > 0.0 { g } else { 0.0 })
        .collect();
    if write_f32s(mem, output, &result).is_none() {
        return 3;
    }
    0
}

/// The kernel table a default device process is loaded with.
pub fn builtin_kernel_table() -> HashMap<String, Kernel> {
    let mut table: HashMap<String, Kernel> = HashMap::new();
    table.insert("Relu".to_string(), relu);
    table.insert("ReluGrad".to_string(), relu_grad);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::DeviceProcess;

    fn pack(words: &[u64]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn relu_clamps_negatives() {
        let mut proc = DeviceProcess::create(1 << 10, builtin_kernel_table());
        let input = proc.memory_mut().alloc(16).unwrap();
        let output = proc.memory_mut().alloc(16).unwrap();
        let host: Vec<u8> = [-1.0f32, 2.0, -3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        proc.memory_mut().write(input, &host).unwrap();

        proc.call("Relu", &pack(&[input, output, 4])).unwrap();

        let mut back = [0u8; 16];
        proc.memory().read(output, &mut back).unwrap();
        let values: Vec<f32> = back
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn malformed_arguments_fail_in_kernel() {
        let mut proc = DeviceProcess::create(1 << 10, builtin_kernel_table());
        let err = proc.call("Relu", &[0; 3]).unwrap_err();
        assert!(err.to_string().contains("failed with status"));
    }
}
