//! rpi-spi - Linux spidev SPI interface
//!
//! This crate provides a thin handle over the Linux spidev character
//! device interface (`/dev/spidevX.Y`) as found on Raspberry Pi class
//! boards: open a device, configure mode/speed/word length, and perform
//! full-duplex byte transfers.
//!
//! # Overview
//!
//! The Linux SPI driver exposes SPI controllers through character devices
//! at `/dev/spidevX.Y` where X is the bus number and Y is the chip select.
//! [`SpiHandle`] owns one such device and caches the last configuration the
//! driver accepted. Opening applies the defaults mode 0, 8 bits per word
//! and 10 MHz; each setter commits its cached value only after the driver
//! confirms the write.
//!
//! # Example
//!
//! ```no_run
//! use rpi_spi::{mode, SpiHandle};
//!
//! // Open with default settings (10 MHz, mode 0, 8-bit words)
//! let mut spi = SpiHandle::open_device("/dev/spidev0.0")?;
//!
//! // Reconfigure
//! spi.set_speed(4_000_000)?; // 4 MHz
//! spi.set_mode(mode::MODE_3)?;
//!
//! // Full-duplex exchange
//! let tx = [0xAA, 0xBB, 0xCC];
//! let mut rx = [0u8; 3];
//! let n = spi.transfer(&mut rx, &tx)?;
//! println!("exchanged {} bytes: {:02X?}", n, &rx[..n]);
//!
//! spi.close()?;
//! # Ok::<(), rpi_spi::SpiError>(())
//! ```
//!
//! # Concurrency
//!
//! Every operation is a blocking call into the driver. The handle carries
//! no internal synchronization: at most one in-flight operation per handle
//! unless the caller serializes externally.
//!
//! # System Requirements
//!
//! - Linux kernel with spidev support enabled (`CONFIG_SPI_SPIDEV`)
//! - Read/write access to `/dev/spidevX.Y` device
//! - May require adding user to `spi` group or using udev rules

pub mod device;
pub mod error;

// Re-exports
pub use device::{mode, SpiHandle, DEFAULT_SPEED_HZ, DEFAULT_WORD_LEN, PORT_NAME_LEN};
pub use error::{Result, SpiError};
