//! Pretrained weight loading into trainable variables

use candle_core::{Device, Result};
use candle_nn::VarMap;
use std::collections::HashSet;
use std::path::PathBuf;

/// Copies every tensor of the safetensors `files` whose name matches a
/// variable in `varmap`, converting to the variable's dtype and device.
/// Tensors without a matching variable are skipped; a variable that no
/// shard provides is an error. Returns the number of variables filled.
pub fn load_into_varmap(varmap: &VarMap, files: &[PathBuf]) -> Result<usize> {
    if files.is_empty() {
        candle_core::bail!("no safetensors files to load");
    }

    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("VarMap lock poisoned".to_string()))?;
    let mut pending: HashSet<&str> = data.keys().map(String::as_str).collect();
    let mut skipped = 0usize;

    for file in files {
        let tensors = candle_core::safetensors::load(file, &Device::Cpu)?;
        tracing::debug!("{}: {} tensors", file.display(), tensors.len());

        for (name, tensor) in tensors {
            let Some(var) = data.get(&name) else {
                skipped += 1;
                continue;
            };
            if tensor.dims() != var.dims() {
                candle_core::bail!(
                    "shape mismatch for {name}: checkpoint {:?}, model {:?}",
                    tensor.dims(),
                    var.dims()
                );
            }
            let tensor = tensor.to_dtype(var.dtype())?.to_device(var.device())?;
            var.set(&tensor)?;
            pending.remove(name.as_str());
        }
    }

    if !pending.is_empty() {
        let mut missing: Vec<&str> = pending.into_iter().collect();
        missing.sort_unstable();
        candle_core::bail!(
            "{} parameter(s) missing from checkpoint, first: {}",
            missing.len(),
            missing[0]
        );
    }
    if skipped > 0 {
        tracing::debug!("Ignored {} checkpoint tensor(s) with no model parameter", skipped);
    }

    Ok(data.len())
}
