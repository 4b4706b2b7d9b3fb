//! Output devices: the line abstraction, its implementations, and the
//! per-device stream the mixer writes to.

mod line;
mod rodio_line;
mod stream;

pub use line::{AudioLine, DeviceResolver, NullLine};
pub use rodio_line::{list_output_devices, RodioLine, RodioResolver};
pub use stream::{DeviceBinding, OutputDevice, SoundCardStream};
