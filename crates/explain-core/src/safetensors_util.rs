use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

use crate::error::{ModelError, Result};

/// Copies every tensor of a safetensors file into the matching variable of `vs`.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut loaded = HashSet::new();

    for (name, view) in tensors.tensors() {
        if let Some(var) = variables.get_mut(&name) {
            let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
            let kind = match view.dtype() {
                Dtype::F32 => Kind::Float,
                Dtype::F16 => Kind::Half,
                Dtype::BF16 => Kind::BFloat16,
                other => return Err(ModelError::UnsupportedDtype(format!("{:?}", other))),
            };

            let data = view.data();
            let tch_tensor = Tensor::f_from_data_size(data, &shape, kind)?
                .to_kind(var.kind())
                .to_device(device);

            tch::no_grad(|| var.f_copy_(&tch_tensor))?;
            tracing::debug!(tensor = %name, "loaded tensor");
            loaded.insert(name);
        } else {
            tracing::warn!(tensor = %name, "tensor found in safetensors but not in model");
        }
    }

    let missing: Vec<&String> = variables.keys().filter(|k| !loaded.contains(*k)).collect();
    if !missing.is_empty() {
        return Err(ModelError::Load {
            name: path.display().to_string(),
            reason: format!(
                "{} model tensors missing from checkpoint, e.g. {}",
                missing.len(),
                missing[0]
            ),
        });
    }

    tracing::info!(path = %path.display(), tensors = loaded.len(), "loaded weights");
    Ok(())
}

/// Writes every variable of `vs` as little-endian f32.
pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
    let variables = vs.variables();

    let mut buffers = Vec::with_capacity(variables.len());
    for (name, var) in &variables {
        let tensor = var.to_device(Device::Cpu).to_kind(Kind::Float).contiguous();
        let shape: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
        let numel = tensor.numel();
        let mut values = vec![0f32; numel];
        tensor.f_copy_data(&mut values, numel)?;
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name.clone(), shape, bytes));
    }

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.as_str(), view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}
