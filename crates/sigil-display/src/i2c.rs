//! `/dev/i2c-N` backend for the LCD bus.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;

use crate::lcd::LcdBus;

const I2C_SLAVE: libc::c_ulong = 0x0703;

pub struct LinuxI2c {
    device: File,
}

impl LinuxI2c {
    /// Open bus `i2c_bus` and address the expander at `address`.
    pub fn open(i2c_bus: u8, address: u16) -> io::Result<LinuxI2c> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/i2c-{i2c_bus}"))?;
        let rc = unsafe { libc::ioctl(device.as_raw_fd(), I2C_SLAVE, address as libc::c_ulong) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(LinuxI2c { device })
    }
}

impl LcdBus for LinuxI2c {
    fn write_byte(&mut self, bits: u8) -> io::Result<()> {
        self.device.write_all(&[bits])
    }
}
