//! The reset interface that Pico SDK firmware built with `stdio_usb` exposes
//! next to its CDC interface. It lets the host reboot the board into BOOTSEL
//! mode, or back into its flash image, without touching the button.

use std::time::Duration;

use nusb::{
    transfer::{ControlOut, ControlType, Recipient, TransferError},
    Device,
};

use crate::picoboot::usb::{claim_interface, with_timeout};
use crate::{Error, Result};

const RESET_INTERFACE_SUBCLASS: u8 = 0x00;
const RESET_INTERFACE_PROTOCOL: u8 = 0x01;
const RESET_TIMEOUT: Duration = Duration::from_millis(2000);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRequest {
    Bootsel = 0x01,
    Flash = 0x02,
}

/// Number of the first interface on `device` that speaks the reset protocol.
pub fn find_reset_interface(device: &Device) -> Option<u8> {
    device.configurations().find_map(|cfg| {
        cfg.interface_alt_settings()
            .find(|alt| {
                alt.class() == 0xff
                    && alt.subclass() == RESET_INTERFACE_SUBCLASS
                    && alt.protocol() == RESET_INTERFACE_PROTOCOL
            })
            .map(|alt| alt.interface_number())
    })
}

pub fn send_reset_request(device: &Device, interface_number: u8, request: ResetRequest) -> Result<()> {
    let interface = claim_interface(device, interface_number)?;
    log::debug!("sending {:?} reset request on interface {}", request, interface_number);
    let result = with_timeout(
        async {
            let comp = interface
                .control_out(ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: request as u8,
                    value: 0,
                    index: interface_number as u16,
                    data: &[],
                })
                .await;
            comp.into_result()?;
            Ok::<_, Error>(())
        },
        RESET_TIMEOUT,
    );
    match result {
        // the board can drop off the bus before it completes the status stage
        Err(Error::Transfer(TransferError::Disconnected)) => Ok(()),
        other => other,
    }
}
