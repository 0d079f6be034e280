pub mod descriptors;
pub mod device;

pub use device::{Direction, UsbDevice, start_usb_device};
