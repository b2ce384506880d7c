//! USB presence discovery through libusb

use super::{DeviceProbe, UsbDeviceInfo};
use crate::error::DeviceError;

/// Enumerates the USB bus on every call
#[derive(Debug, Default, Clone, Copy)]
pub struct UsbProbe;

impl UsbProbe {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProbe for UsbProbe {
    fn find(&self, vendor_id: u16, product_id: u16) -> Result<Option<UsbDeviceInfo>, DeviceError> {
        let devices = rusb::devices().map_err(|e| DeviceError::Discovery(e.to_string()))?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    // Devices we may not open are irrelevant unless they are ours
                    tracing::trace!(
                        bus = device.bus_number(),
                        address = device.address(),
                        error = %e,
                        "Skipping unreadable USB descriptor"
                    );
                    continue;
                }
            };

            if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
                return Ok(Some(UsbDeviceInfo {
                    vendor_id,
                    product_id,
                    bus: device.bus_number(),
                    address: device.address(),
                }));
            }
        }

        Ok(None)
    }
}
