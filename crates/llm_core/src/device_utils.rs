use candle_core::{DType, Device, Result};

/// CUDA device 0 when the crate is built with `cuda` and a GPU is present,
/// CPU otherwise (or when `force_cpu` is set).
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        return Ok(Device::Cpu);
    }
    match Device::cuda_if_available(0) {
        Ok(device) => Ok(device),
        Err(e) => {
            tracing::warn!("CUDA initialisation failed ({}), falling back to CPU", e);
            Ok(Device::Cpu)
        }
    }
}

/// Parameter dtype for a device: bf16 on accelerators when requested or
/// left to choose, f32 on CPU unless bf16 is explicitly requested.
pub fn resolve_dtype(device: &Device, bf16: Option<bool>) -> DType {
    match bf16 {
        Some(true) => DType::BF16,
        Some(false) => DType::F32,
        None if device.is_cpu() => DType::F32,
        None => DType::BF16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_auto_is_f32() {
        assert_eq!(resolve_dtype(&Device::Cpu, None), DType::F32);
        assert_eq!(resolve_dtype(&Device::Cpu, Some(true)), DType::BF16);
    }

    #[test]
    fn forced_cpu() {
        assert!(select_device(true).unwrap().is_cpu());
    }
}
