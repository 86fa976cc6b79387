pub mod cmd;
pub mod usb;

pub use usb::PicobootConnection;
