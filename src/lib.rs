pub use attention;
pub use model::{EncoderBlock, HyperParameters, ModelError, TokenEncoder, Transformer};

use anyhow::Result;
use candle_core::Device;

/// Picks the compute device: CUDA when available, CPU otherwise.
///
/// Setting `CANDLE_FORCE_CPU` skips the accelerator probe.
pub fn setup_device() -> Result<Device> {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        log::info!("CANDLE_FORCE_CPU set, using CPU backend");
        return Ok(Device::Cpu);
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            log::info!("CUDA device selected: {device:?}");
            Ok(device)
        }
        Ok(_) | Err(_) => {
            log::info!("using CPU backend");
            Ok(Device::Cpu)
        }
    }
}
