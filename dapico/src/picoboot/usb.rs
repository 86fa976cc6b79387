// This implementation is derived from the reference example provided at
// https://github.com/NotQuiteApex/usb-picoboot-rs
// with additions from https://github.com/9names/usb-picoboot-rs/tree/nusb

// see https://datasheets.raspberrypi.com/rp2040/rp2040-datasheet.pdf
// section 2.8.5 for details on PICOBOOT interface

use crate::picoboot::cmd::*;
use crate::{Error, Result, TargetID, PID_RP2040_BOOTSEL, PID_RP2350_BOOTSEL, RP_VID};
use async_io::{block_on, Timer};
use futures_lite::FutureExt;
use nusb::{
    transfer::{ControlIn, ControlOut, ControlType, Direction, EndpointType, Recipient, RequestBuffer},
    Device, DeviceInfo, Interface,
};
use std::{future::Future, time::Duration};

const USB_TIMEOUT: Duration = Duration::from_millis(3000);
const USB_DATA_TIMEOUT: Duration = Duration::from_millis(9000);

/// Drives `fut` to completion, giving up after `timeout`.
pub(crate) fn with_timeout<T>(fut: impl Future<Output = Result<T>>, timeout: Duration) -> Result<T> {
    block_on(fut.or(async {
        Timer::after(timeout).await;
        Err(Error::TimedOut)
    }))
}

pub(crate) fn claim_interface(device: &Device, interface_number: u8) -> Result<Interface> {
    match device.claim_interface(interface_number) {
        Ok(interface) => Ok(interface),
        Err(e) => {
            // maybe device is attached to OS driver? try to detach too
            log::debug!("claiming interface {} failed ({}), detaching", interface_number, e);
            Ok(device.detach_and_claim_interface(interface_number)?)
        }
    }
}

fn is_picoboot_device(device: &DeviceInfo) -> bool {
    matches!(
        (device.vendor_id(), device.product_id()),
        (RP_VID, PID_RP2040_BOOTSEL) | (RP_VID, PID_RP2350_BOOTSEL)
    )
}

/// Interface number and bulk endpoints of a PICOBOOT interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicobootEndpoints {
    pub interface_number: u8,
    pub endpoint_out_addr: u8,
    pub endpoint_in_addr: u8,
}

impl PicobootEndpoints {
    pub fn find(device: &Device) -> Option<Self> {
        for config in device.configurations() {
            for interface in config.interfaces() {
                for altsetting in interface.alt_settings() {
                    // from ref manual 5.6.2: PICOBOOT interface is recognised by
                    // the vendor-specific Interface Class (0xff)
                    // the zero interface subclass
                    // the zero interface protocol
                    if altsetting.class() != 0xff
                        || altsetting.subclass() != 0
                        || altsetting.protocol() != 0
                    {
                        continue;
                    }
                    let mut endpoint_out_addr = None;
                    let mut endpoint_in_addr = None;
                    for endpoint in altsetting.endpoints() {
                        if endpoint.transfer_type() != EndpointType::Bulk {
                            continue;
                        }
                        match endpoint.direction() {
                            Direction::Out => endpoint_out_addr = Some(endpoint.address()),
                            Direction::In => endpoint_in_addr = Some(endpoint.address()),
                        }
                    }
                    if let (Some(endpoint_out_addr), Some(endpoint_in_addr)) =
                        (endpoint_out_addr, endpoint_in_addr)
                    {
                        return Some(PicobootEndpoints {
                            interface_number: interface.interface_number(),
                            endpoint_out_addr,
                            endpoint_in_addr,
                        });
                    }
                }
            }
        }
        None
    }
}

pub struct PicobootConnection {
    interface: Interface,
    endpoints: PicobootEndpoints,
    cmd_token: u32,
    target_id: TargetID,
}

impl PicobootConnection {
    /// Connects to the first device in BOOTSEL mode.
    pub fn open() -> Result<Self> {
        let devices: Vec<DeviceInfo> = nusb::list_devices()?.filter(is_picoboot_device).collect();
        for device in &devices {
            log::info!(
                "Found an {:?} in bootsel mode",
                TargetID::from_product_id(device.product_id())
            );
        }
        let info = devices.first().ok_or(Error::NoBootselDevice)?;
        if devices.len() > 1 {
            log::warn!("Found more than one device. Using the first one found");
        }

        let target_id =
            TargetID::from_product_id(info.product_id()).ok_or(Error::NoBootselDevice)?;
        let device = info.open()?;
        let endpoints = PicobootEndpoints::find(&device).ok_or(Error::NoInterface)?;
        Self::claim(&device, target_id, endpoints)
    }

    /// Claims the PICOBOOT interface of an already opened device.
    pub fn claim(device: &Device, target_id: TargetID, endpoints: PicobootEndpoints) -> Result<Self> {
        let interface = claim_interface(device, endpoints.interface_number)?;
        Ok(PicobootConnection {
            interface,
            endpoints,
            cmd_token: 1,
            target_id,
        })
    }

    fn bulk_read(&self, buf_size: usize, timeout: Duration) -> Result<Vec<u8>> {
        with_timeout(
            async {
                let comp = self
                    .interface
                    .bulk_in(self.endpoints.endpoint_in_addr, RequestBuffer::new(buf_size))
                    .await;
                Ok::<_, Error>(comp.into_result()?)
            },
            timeout,
        )
    }

    fn bulk_write(&self, buf: Vec<u8>, timeout: Duration) -> Result<usize> {
        with_timeout(
            async {
                let comp = self
                    .interface
                    .bulk_out(self.endpoints.endpoint_out_addr, buf)
                    .await;
                comp.status?;
                Ok::<_, Error>(comp.data.actual_length())
            },
            timeout,
        )
    }

    fn bulk_write_exact(&self, buf: Vec<u8>, timeout: Duration) -> Result<()> {
        let expected = buf.len();
        let actual = self.bulk_write(buf, timeout)?;
        if actual != expected {
            return Err(Error::ShortTransfer { expected, actual });
        }
        Ok(())
    }

    /// Command phase, optional data phase, then the ack in the opposite
    /// direction of the data.
    fn transact(&mut self, mut cmd: PicobootCmd, buf: Vec<u8>) -> Result<Vec<u8>> {
        cmd.token = self.cmd_token;
        self.cmd_token += 1;
        log::debug!(
            "cmd {:?} token {} transfer_len {}",
            PicobootCmdId::try_from(cmd.cmd_id),
            cmd.token,
            cmd.transfer_len
        );

        let cmdu8 = bincode::serialize(&cmd)?;
        self.bulk_write_exact(cmdu8, USB_TIMEOUT)?;

        let len = cmd.transfer_len as usize;
        let mut res = vec![];
        if len != 0 {
            if cmd.is_in() {
                res = self.bulk_read(len, USB_DATA_TIMEOUT)?;
                if res.len() != len {
                    return Err(Error::ShortTransfer {
                        expected: len,
                        actual: res.len(),
                    });
                }
            } else {
                self.bulk_write_exact(buf, USB_DATA_TIMEOUT)?;
            }
        }

        if cmd.is_in() {
            self.bulk_write(vec![], USB_TIMEOUT)?;
        } else {
            self.bulk_read(1, USB_TIMEOUT)?;
        }
        Ok(res)
    }

    /// Like `transact`, but a failed command is reported with the status the
    /// device gives for it, when there is one.
    fn cmd(&mut self, cmd: PicobootCmd, buf: Vec<u8>) -> Result<Vec<u8>> {
        let cmd_id = cmd.cmd_id;
        match self.transact(cmd, buf) {
            Err(e) if !e.is_disconnect() => match self.get_command_status() {
                Ok(stat) => match stat.status() {
                    Some(status) if status != PicobootStatus::Ok => {
                        Err(Error::Status { cmd_id, status })
                    }
                    _ => Err(e),
                },
                Err(status_err) => {
                    log::debug!("command status unavailable: {}", status_err);
                    Err(e)
                }
            },
            other => other,
        }
    }

    pub fn reboot(&mut self, pc: u32, sp: u32, delay: u32) -> Result<()> {
        let cmd = PicobootCmd::new(PicobootCmdId::Reboot, PicobootRebootCmd::ser(pc, sp, delay)?, 0);
        self.cmd(cmd, vec![]).map(|_| ())
    }

    pub fn reboot2_normal(&mut self, delay: u32) -> Result<()> {
        let args = PicobootReboot2Cmd::ser(REBOOT2_FLAG_REBOOT_TYPE_NORMAL, delay, 0, 0)?;
        let cmd = PicobootCmd::new(PicobootCmdId::Reboot2, args, 0);
        self.cmd(cmd, vec![]).map(|_| ())
    }

    pub fn flash_erase(&mut self, addr: u32, size: u32) -> Result<()> {
        let cmd = PicobootCmd::new(PicobootCmdId::FlashErase, PicobootRangeCmd::ser(addr, size)?, 0);
        self.cmd(cmd, vec![]).map(|_| ())
    }

    /// Writes RAM or (erased) flash.
    pub fn write(&mut self, addr: u32, buf: Vec<u8>) -> Result<()> {
        let size = buf.len() as u32;
        let cmd = PicobootCmd::new(PicobootCmdId::Write, PicobootRangeCmd::ser(addr, size)?, size);
        self.cmd(cmd, buf).map(|_| ())
    }

    pub fn exit_xip(&mut self) -> Result<()> {
        self.cmd(PicobootCmd::bare(PicobootCmdId::ExitXip), vec![])
            .map(|_| ())
    }

    /// Jumps to `addr`. The device may start running the image, or drop off
    /// the bus, before it acks, so both count as success.
    pub fn exec(&mut self, addr: u32) -> Result<()> {
        let cmd = PicobootCmd::new(PicobootCmdId::Exec, PicobootAddressOnlyCmd::ser(addr)?, 0);
        let err = match self.transact(cmd, vec![]) {
            Ok(_) => return Ok(()),
            Err(e) if e.is_disconnect() => return Ok(()),
            Err(e) => e,
        };
        match self.get_command_status() {
            Ok(stat)
                if matches!(
                    stat.status(),
                    Some(PicobootStatus::Ok | PicobootStatus::Rebooting)
                ) =>
            {
                Ok(())
            }
            Err(e) if e.is_disconnect() => Ok(()),
            _ => Err(err),
        }
    }

    pub fn reset_interface(&mut self) -> Result<()> {
        let interface = &self.interface;
        with_timeout(
            async {
                let comp = interface
                    .control_out(ControlOut {
                        control_type: ControlType::Vendor,
                        recipient: Recipient::Interface,
                        request: PICOBOOT_IF_RESET,
                        value: 0,
                        index: interface.interface_number() as u16,
                        data: &[],
                    })
                    .await;
                comp.into_result()?;
                Ok::<_, Error>(())
            },
            USB_TIMEOUT,
        )
    }

    pub(crate) fn get_command_status(&mut self) -> Result<PicobootStatusCmd> {
        let interface = &self.interface;
        let buf = with_timeout(
            async {
                let comp = interface
                    .control_in(ControlIn {
                        control_type: ControlType::Vendor,
                        recipient: Recipient::Interface,
                        request: PICOBOOT_IF_CMD_STATUS,
                        value: 0,
                        index: interface.interface_number() as u16,
                        length: PICOBOOT_STATUS_SIZE as u16,
                    })
                    .await;
                Ok::<_, Error>(comp.into_result()?)
            },
            USB_TIMEOUT,
        )?;
        if buf.len() != PICOBOOT_STATUS_SIZE {
            return Err(Error::ShortTransfer {
                expected: PICOBOOT_STATUS_SIZE,
                actual: buf.len(),
            });
        }

        let stat: PicobootStatusCmd = bincode::deserialize(&buf)?;
        log::debug!(
            "status token {} code {} cmd {:#04x} in_progress {}",
            stat.token,
            stat.status_code,
            stat.cmd_id,
            stat.in_progress
        );
        Ok(stat)
    }

    pub fn get_device_type(&self) -> TargetID {
        self.target_id
    }
}
