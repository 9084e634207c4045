//! Causal attention masks shared by the LLaMA and GPT-2 backends
//!
//! Every stimulus chunk is scored in a single full-sequence forward pass, so
//! only the square causal mask is needed. Stimuli within a study have similar
//! lengths, which makes caching by `(seq_len, device, dtype)` worthwhile.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

type MaskCache = LazyLock<Mutex<HashMap<(usize, usize, DType), Tensor>>>;

static CAUSAL_MASK_CACHE: MaskCache = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Coarse device key; one device per kind is assumed.
fn device_key(device: &Device) -> usize {
    match device {
        Device::Cpu => 0,
        Device::Cuda(_) => 1,
        Device::Metal(_) => 2,
    }
}

/// Create or fetch a cached causal mask of shape `[1, 1, seq_len, seq_len]`.
///
/// Entry `(i, j)` is `0.0` when position `i` may attend to `j` (`j <= i`)
/// and `-inf` otherwise, so the mask is added to attention scores before
/// the softmax.
pub fn create_causal_mask(seq_len: usize, device: &Device, dtype: DType) -> Result<Tensor> {
    let key = (seq_len, device_key(device), dtype);

    if let Some(cached) = CAUSAL_MASK_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return Ok(cached.clone());
    }

    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j <= i { 0.0 } else { f32::NEG_INFINITY }))
        .collect();
    let mask = Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)?.to_dtype(dtype)?;

    CAUSAL_MASK_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, mask.clone());

    Ok(mask)
}

/// Drop every cached mask.
pub fn clear_mask_caches() {
    CAUSAL_MASK_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Number of cached masks
pub fn mask_cache_size() -> usize {
    CAUSAL_MASK_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_causal_mask_shape() {
        let mask = create_causal_mask(4, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 4, 4]);
    }

    #[test]
    #[serial]
    fn test_causal_mask_values() {
        let mask = create_causal_mask(3, &Device::Cpu, DType::F32).unwrap();
        let data: Vec<f32> = mask.flatten_all().unwrap().to_vec1().unwrap();

        for i in 0..3 {
            for j in 0..3 {
                let v = data[i * 3 + j];
                if j <= i {
                    assert_eq!(v, 0.0, "({i}, {j}) should be visible");
                } else {
                    assert!(v.is_infinite() && v < 0.0, "({i}, {j}) should be masked");
                }
            }
        }
    }

    #[test]
    #[serial]
    fn test_causal_mask_caching() {
        clear_mask_caches();
        assert_eq!(mask_cache_size(), 0);

        create_causal_mask(5, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask_cache_size(), 1);

        create_causal_mask(5, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask_cache_size(), 1);

        create_causal_mask(7, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask_cache_size(), 2);

        create_causal_mask(7, &Device::Cpu, DType::F64).unwrap();
        assert_eq!(mask_cache_size(), 3);
    }
}
