//! Linux spidev device handle
//!
//! This module provides the `SpiHandle` struct wrapping a single
//! `/dev/spidevX.Y` character device: open, configure (mode, clock
//! speed, word length) and full-duplex transfer.

use crate::error::{Result, SpiError};

use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};

/// Capacity of the stored port name; longer paths are silently truncated
pub const PORT_NAME_LEN: usize = 128;

/// Default SPI clock speed in Hz (10 MHz)
pub const DEFAULT_SPEED_HZ: u32 = 10_000_000;

/// Default SPI word length in bits
pub const DEFAULT_WORD_LEN: u8 = 8;

/// SPI mode constants
pub mod mode {
    /// SPI mode 0: CPOL=0, CPHA=0
    pub const MODE_0: u8 = 0;
    /// SPI mode 1: CPOL=0, CPHA=1
    pub const MODE_1: u8 = 1;
    /// SPI mode 2: CPOL=1, CPHA=0
    pub const MODE_2: u8 = 2;
    /// SPI mode 3: CPOL=1, CPHA=1
    pub const MODE_3: u8 = 3;
}

/// Linux spidev ioctl constants
mod ioctl {
    use nix::ioctl_read;
    use nix::ioctl_write_ptr;

    // SPI ioctl magic number
    const SPI_IOC_MAGIC: u8 = b'k';

    // SPI ioctl type numbers
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    // Generate ioctl functions
    ioctl_read!(spi_ioc_rd_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_read!(
        spi_ioc_rd_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_read!(
        spi_ioc_rd_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    // SPI_IOC_MESSAGE ioctl number calculation
    // This is SPI_IOC_MESSAGE(n) = _IOW(SPI_IOC_MAGIC, 0, char[SPI_MSGSIZE(n)])
    // where SPI_MSGSIZE(n) = (n) * sizeof(struct spi_ioc_transfer)

    /// Size of spi_ioc_transfer struct
    pub const SPI_IOC_TRANSFER_SIZE: usize = 32;

    /// Calculate ioctl number for SPI_IOC_MESSAGE(n)
    pub fn spi_ioc_message(n: u8) -> libc::c_ulong {
        let size = (n as usize) * SPI_IOC_TRANSFER_SIZE;
        // _IOW = _IOC(_IOC_WRITE, type, nr, size)
        // _IOC_WRITE = 1
        // _IOC(dir, type, nr, size) = ((dir)<<30)|((size)<<16)|((type)<<8)|(nr)
        ((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong
    }
}

/// SPI transfer structure for ioctl
/// This must match the kernel's struct spi_ioc_transfer layout
#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,          // __u64 tx_buf
    rx_buf: u64,          // __u64 rx_buf
    len: u32,             // __u32 len
    speed_hz: u32,        // __u32 speed_hz
    delay_usecs: u16,     // __u16 delay_usecs
    bits_per_word: u8,    // __u8 bits_per_word
    cs_change: u8,        // __u8 cs_change
    tx_nbits: u8,         // __u8 tx_nbits
    rx_nbits: u8,         // __u8 rx_nbits
    word_delay_usecs: u8, // __u8 word_delay_usecs
    _pad: u8,             // padding
}

/// Handle for one spidev device
///
/// Owns the open file descriptor and caches the last configuration the
/// driver accepted. The cache stores the requested values, not the
/// driver's read-back echo. All calls are blocking; the handle carries no
/// synchronization, so at most one operation may be in flight per handle
/// unless the caller serializes externally.
///
/// Dropping an open handle releases the descriptor; call [`close`] to
/// observe close errors.
///
/// [`close`]: SpiHandle::close
#[derive(Debug)]
pub struct SpiHandle {
    /// File handle for the spidev device, `None` while closed
    file: Option<File>,
    /// Device path stored at open time, informational only
    port: heapless::String<PORT_NAME_LEN>,
    /// Current clock speed in Hz
    speed_hz: u32,
    /// Current word length in bits
    word_len: u8,
    /// Current SPI mode
    mode: u8,
}

impl Default for SpiHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiHandle {
    /// Create a closed handle with the default cached configuration
    pub fn new() -> Self {
        Self {
            file: None,
            port: heapless::String::new(),
            speed_hz: DEFAULT_SPEED_HZ,
            word_len: DEFAULT_WORD_LEN,
            mode: mode::MODE_0,
        }
    }

    /// Open a device and return the configured handle
    pub fn open_device(port: &str) -> Result<Self> {
        let mut handle = Self::new();
        handle.open(port)?;
        Ok(handle)
    }

    /// Open the device at `port` for read-write access
    ///
    /// On success the handle is open with the default configuration
    /// applied in order: mode 0, 8 bits per word, 10 MHz. If the driver
    /// rejects any default, the descriptor is closed again and that
    /// step's error is returned; the handle is left closed rather than
    /// partially configured.
    pub fn open(&mut self, port: &str) -> Result<()> {
        if port.is_empty() {
            return Err(SpiError::InvalidArgument("empty port name"));
        }
        if self.file.is_some() {
            return Err(SpiError::InvalidArgument("device already open"));
        }

        log::debug!("rpi_spi: Opening device {}", port);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(port)
            .map_err(|e| SpiError::OpenFailed {
                path: port.to_string(),
                source: e,
            })?;
        self.file = Some(file);

        self.port.clear();
        for ch in port.chars() {
            if self.port.push(ch).is_err() {
                break;
            }
        }

        // Apply defaults. A failed step must not leak the descriptor.
        if let Err(err) = self.apply_defaults() {
            let _ = self.close();
            return Err(err);
        }

        log::info!(
            "rpi_spi: Opened {} (mode={}, speed={} kHz, word_len={})",
            self.port.as_str(),
            self.mode,
            self.speed_hz / 1000,
            self.word_len
        );

        Ok(())
    }

    fn apply_defaults(&mut self) -> Result<()> {
        self.set_mode(mode::MODE_0)?;
        self.set_word_len(DEFAULT_WORD_LEN)?;
        self.set_speed(DEFAULT_SPEED_HZ)?;
        Ok(())
    }

    /// Close the device if open
    ///
    /// Idempotent: closing an already-closed handle succeeds. The cached
    /// configuration is left in place but is stale once closed.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            let fd = file.into_raw_fd();
            if unsafe { libc::close(fd) } < 0 {
                return Err(SpiError::CloseFailed(std::io::Error::last_os_error()));
            }
            log::debug!("rpi_spi: Closed {}", self.port.as_str());
        }
        Ok(())
    }

    /// Whether the handle currently owns an open descriptor
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Device path stored at the last open, truncated to [`PORT_NAME_LEN`]
    pub fn port(&self) -> &str {
        self.port.as_str()
    }

    fn fd(&self) -> Result<RawFd> {
        self.file
            .as_ref()
            .map(|f| f.as_raw_fd())
            .ok_or(SpiError::NotOpen)
    }

    /// Set the SPI mode (see the [`mode`] constants)
    ///
    /// Writes the mode to the driver and reads it back to confirm the
    /// device accepted a mode write; the read-back value is discarded and
    /// the requested mode is cached.
    pub fn set_mode(&mut self, mode: u8) -> Result<()> {
        let fd = self.fd()?;
        let mut echo: u8 = mode;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode).map_err(|e| SpiError::ConfigRejected {
                setting: "mode",
                value: mode as u32,
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;
            ioctl::spi_ioc_rd_mode(fd, &mut echo).map_err(|e| SpiError::ConfigRejected {
                setting: "mode",
                value: mode as u32,
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;
        }
        self.mode = mode;
        log::debug!("rpi_spi: Set mode to {}", mode);
        Ok(())
    }

    /// Set the SPI clock speed in Hz
    ///
    /// No bound validation is done here; the driver enforces its own
    /// limits. Same write-then-read-back pattern as [`set_mode`].
    ///
    /// [`set_mode`]: SpiHandle::set_mode
    pub fn set_speed(&mut self, speed_hz: u32) -> Result<()> {
        let fd = self.fd()?;
        let mut echo: u32 = speed_hz;
        unsafe {
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed_hz).map_err(|e| {
                SpiError::ConfigRejected {
                    setting: "speed",
                    value: speed_hz,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
            ioctl::spi_ioc_rd_max_speed_hz(fd, &mut echo).map_err(|e| {
                SpiError::ConfigRejected {
                    setting: "speed",
                    value: speed_hz,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }
        self.speed_hz = speed_hz;
        log::debug!("rpi_spi: Set speed to {} Hz", speed_hz);
        Ok(())
    }

    /// Set the SPI word length in bits (minimum 1)
    pub fn set_word_len(&mut self, bits: u8) -> Result<()> {
        let fd = self.fd()?;
        if bits < 1 {
            return Err(SpiError::InvalidArgument("word length must be at least 1"));
        }
        let mut echo: u8 = bits;
        unsafe {
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits).map_err(|e| SpiError::ConfigRejected {
                setting: "word length",
                value: bits as u32,
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;
            ioctl::spi_ioc_rd_bits_per_word(fd, &mut echo).map_err(|e| {
                SpiError::ConfigRejected {
                    setting: "word length",
                    value: bits as u32,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }
        self.word_len = bits;
        log::debug!("rpi_spi: Set word length to {} bits", bits);
        Ok(())
    }

    /// Cached SPI mode; no driver round-trip
    pub fn mode(&self) -> Result<u8> {
        self.fd()?;
        Ok(self.mode)
    }

    /// Cached clock speed in Hz; no driver round-trip
    pub fn speed(&self) -> Result<u32> {
        self.fd()?;
        Ok(self.speed_hz)
    }

    /// Cached word length in bits; no driver round-trip
    pub fn word_len(&self) -> Result<u8> {
        self.fd()?;
        Ok(self.word_len)
    }

    /// Perform one full-duplex SPI exchange
    ///
    /// Requests transmission of all of `tx` while simultaneously
    /// receiving the same number of bytes into `rx`, which must be at
    /// least `tx.len()` long. `tx` must fit the driver's 32-bit length
    /// field. The exchange uses the cached speed and word length; chip
    /// select is released after the call. An empty `tx` is a zero-byte
    /// exchange.
    ///
    /// Returns the driver-reported number of bytes transferred, which may
    /// be less than `tx.len()`.
    pub fn transfer(&mut self, rx: &mut [u8], tx: &[u8]) -> Result<usize> {
        let fd = self.fd()?;
        if rx.len() < tx.len() {
            return Err(SpiError::InvalidArgument(
                "receive buffer shorter than transmit buffer",
            ));
        }
        let len = u32::try_from(tx.len())
            .map_err(|_| SpiError::InvalidArgument("transmit buffer exceeds 32-bit length"))?;

        let xfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len,
            speed_hz: self.speed_hz,
            delay_usecs: 0,
            bits_per_word: self.word_len,
            cs_change: 0,
            tx_nbits: 0,
            rx_nbits: 0,
            word_delay_usecs: 0,
            _pad: 0,
        };

        let ioctl_num = ioctl::spi_ioc_message(1);
        let ret = unsafe { libc::ioctl(fd, ioctl_num, &xfer as *const SpiIocTransfer) };
        if ret < 0 {
            return Err(SpiError::TransferFailed(std::io::Error::last_os_error()));
        }

        Ok(ret as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_handle_rejects_configuration() {
        let mut spi = SpiHandle::new();
        assert!(matches!(spi.set_mode(mode::MODE_1), Err(SpiError::NotOpen)));
        assert!(matches!(spi.set_speed(1_000_000), Err(SpiError::NotOpen)));
        assert!(matches!(spi.set_word_len(8), Err(SpiError::NotOpen)));
        assert!(matches!(spi.mode(), Err(SpiError::NotOpen)));
        assert!(matches!(spi.speed(), Err(SpiError::NotOpen)));
        assert!(matches!(spi.word_len(), Err(SpiError::NotOpen)));
        // The open check comes before the word-length argument check
        assert!(matches!(spi.set_word_len(0), Err(SpiError::NotOpen)));
    }

    #[test]
    fn transfer_on_closed_handle_fails() {
        let mut spi = SpiHandle::new();
        let tx = [0xAA, 0xBB, 0xCC];
        let mut rx = [0u8; 3];
        assert!(matches!(
            spi.transfer(&mut rx, &tx),
            Err(SpiError::NotOpen)
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut spi = SpiHandle::new();
        assert!(spi.close().is_ok());
        assert!(spi.close().is_ok());
    }

    #[test]
    fn open_rejects_empty_port() {
        let mut spi = SpiHandle::new();
        assert!(matches!(
            spi.open(""),
            Err(SpiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn open_missing_device_fails_closed() {
        let mut spi = SpiHandle::new();
        assert!(matches!(
            spi.open("/dev/spidev-does-not-exist"),
            Err(SpiError::OpenFailed { .. })
        ));
        assert!(!spi.is_open());
        assert!(matches!(spi.mode(), Err(SpiError::NotOpen)));
    }

    #[test]
    fn open_rolls_back_on_config_failure() {
        // /dev/null opens read-write but rejects SPI ioctls, so open must
        // close the descriptor again and report the failed setting.
        let mut spi = SpiHandle::new();
        assert!(matches!(
            spi.open("/dev/null"),
            Err(SpiError::ConfigRejected { setting: "mode", .. })
        ));
        assert!(!spi.is_open());
        assert!(matches!(spi.speed(), Err(SpiError::NotOpen)));
    }

    #[test]
    fn port_name_is_truncated() {
        let name = format!("rpi-spi-truncation-{}", "x".repeat(160));
        let path = std::env::temp_dir().join(&name);
        std::fs::File::create(&path).unwrap();

        let mut spi = SpiHandle::new();
        // A regular file accepts the open but rejects the SPI ioctls.
        assert!(spi.open(path.to_str().unwrap()).is_err());
        assert!(spi.port().len() <= PORT_NAME_LEN);
        assert!(spi.port().starts_with("/"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn transfer_struct_matches_kernel_layout() {
        assert_eq!(
            std::mem::size_of::<SpiIocTransfer>(),
            ioctl::SPI_IOC_TRANSFER_SIZE
        );
    }

    #[test]
    fn spi_ioc_message_number_matches_kernel() {
        // SPI_IOC_MESSAGE(1) as computed by the kernel headers
        assert_eq!(ioctl::spi_ioc_message(1), 0x4020_6b00);
    }

    // Requires a spidev device with MOSI wired to MISO.
    #[test]
    #[ignore = "requires loopback-wired /dev/spidev0.0"]
    fn loopback_exchange() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut spi = SpiHandle::open_device("/dev/spidev0.0").unwrap();
        assert_eq!(spi.mode().unwrap(), mode::MODE_0);
        assert_eq!(spi.speed().unwrap(), DEFAULT_SPEED_HZ);
        assert_eq!(spi.word_len().unwrap(), DEFAULT_WORD_LEN);

        assert!(matches!(
            spi.set_word_len(0),
            Err(SpiError::InvalidArgument(_))
        ));
        assert_eq!(spi.word_len().unwrap(), DEFAULT_WORD_LEN);

        for m in mode::MODE_0..=mode::MODE_3 {
            spi.set_mode(m).unwrap();
            assert_eq!(spi.mode().unwrap(), m);
        }
        spi.set_mode(mode::MODE_0).unwrap();

        spi.set_speed(1_000_000).unwrap();
        spi.set_speed(5_000_000).unwrap();
        assert_eq!(spi.speed().unwrap(), 5_000_000);

        let tx = [0xAA, 0xBB, 0xCC];
        let mut rx = [0u8; 3];
        let n = spi.transfer(&mut rx, &tx).unwrap();
        assert!(n <= tx.len());
        assert_eq!(rx[..n], tx[..n]);

        spi.close().unwrap();
        spi.close().unwrap();
    }
}
