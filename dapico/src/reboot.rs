//! Rebooting a board either through PICOBOOT (board is in BOOTSEL mode) or
//! through the reset interface (board runs firmware with `stdio_usb`).

use nusb::{Device, DeviceInfo};

use crate::picoboot::usb::{PicobootConnection, PicobootEndpoints};
use crate::reset::{find_reset_interface, send_reset_request, ResetRequest};
use crate::{
    Error, Result, TargetID, PID_RP2040_BOOTSEL, PID_RP2040_STDIO_USB, PID_RP2350_BOOTSEL,
    PID_RP2350_STDIO_USB, RP_VID,
};

const REBOOT_DELAY_MS: u32 = 500;

fn is_supported_device(device: &DeviceInfo) -> bool {
    device.vendor_id() == RP_VID
        && matches!(
            device.product_id(),
            PID_RP2040_BOOTSEL | PID_RP2350_BOOTSEL | PID_RP2040_STDIO_USB | PID_RP2350_STDIO_USB
        )
}

/// Which of the two reboot routes a device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootInterfaces {
    pub picoboot: Option<PicobootEndpoints>,
    pub reset: Option<u8>,
}

/// How a reboot request is going to be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootRoute {
    Picoboot(PicobootEndpoints),
    ResetInterface(u8, ResetRequest),
    /// BOOTSEL was asked for and the device only talks PICOBOOT, so it is
    /// already there.
    AlreadyInBootsel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootOutcome {
    Sent,
    BootselRequested,
    AlreadyInBootsel,
}

impl RebootInterfaces {
    /// A BOOTSEL reboot prefers the reset interface, a normal one prefers
    /// PICOBOOT.
    pub fn route(&self, bootsel: bool) -> Result<RebootRoute> {
        match (bootsel, self.picoboot, self.reset) {
            (true, _, Some(reset)) => Ok(RebootRoute::ResetInterface(reset, ResetRequest::Bootsel)),
            (true, Some(_), None) => Ok(RebootRoute::AlreadyInBootsel),
            (false, Some(picoboot), _) => Ok(RebootRoute::Picoboot(picoboot)),
            (false, None, Some(reset)) => Ok(RebootRoute::ResetInterface(reset, ResetRequest::Flash)),
            (_, None, None) => Err(Error::NoInterface),
        }
    }
}

pub struct RebootTarget {
    device: Device,
    product_id: u16,
    interfaces: RebootInterfaces,
}

impl RebootTarget {
    /// First Raspberry Pi device that has a PICOBOOT or a reset interface.
    pub fn find() -> Result<Self> {
        let mut found_any = false;
        for info in nusb::list_devices()?.filter(is_supported_device) {
            found_any = true;
            let device = match info.open() {
                Ok(device) => device,
                Err(e) => {
                    log::warn!(
                        "could not open device {:04x}:{:04x}: {}",
                        info.vendor_id(),
                        info.product_id(),
                        e
                    );
                    continue;
                }
            };
            let interfaces = RebootInterfaces {
                picoboot: PicobootEndpoints::find(&device),
                reset: find_reset_interface(&device),
            };
            log::info!(
                "device {:04x}:{:04x} picoboot {:?} reset {:?}",
                info.vendor_id(),
                info.product_id(),
                interfaces.picoboot,
                interfaces.reset
            );
            if interfaces.picoboot.is_some() || interfaces.reset.is_some() {
                return Ok(RebootTarget {
                    device,
                    product_id: info.product_id(),
                    interfaces,
                });
            }
        }
        Err(if found_any {
            Error::NoInterface
        } else {
            Error::NoDevice
        })
    }

    pub fn reboot(&self, bootsel: bool) -> Result<RebootOutcome> {
        match self.interfaces.route(bootsel)? {
            RebootRoute::AlreadyInBootsel => Ok(RebootOutcome::AlreadyInBootsel),
            RebootRoute::ResetInterface(interface_number, request) => {
                send_reset_request(&self.device, interface_number, request)?;
                Ok(match request {
                    ResetRequest::Bootsel => RebootOutcome::BootselRequested,
                    ResetRequest::Flash => RebootOutcome::Sent,
                })
            }
            RebootRoute::Picoboot(endpoints) => {
                let target_id = TargetID::from_product_id(self.product_id).unwrap_or(TargetID::Rp2040);
                let mut conn = PicobootConnection::claim(&self.device, target_id, endpoints)?;
                let result = match target_id {
                    TargetID::Rp2040 => conn.reboot(0, 0, REBOOT_DELAY_MS),
                    TargetID::Rp2350 => conn.reboot2_normal(REBOOT_DELAY_MS),
                };
                match result {
                    Err(e) if !e.is_disconnect() => Err(e),
                    _ => Ok(RebootOutcome::Sent),
                }
            }
        }
    }
}
