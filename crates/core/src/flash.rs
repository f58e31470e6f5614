//! VMU flash controller.
//!
//! 128 KB of flash hold both program memory (low 64 KB, the window the CPU
//! executes from) and the VMU filesystem. Runtime writes come from `STF` and
//! the firmware write service; they are honored only when the image was
//! loaded with writes enabled.

use tracing::{debug, trace};

use crate::error::LoadError;
use crate::image::{self, ImageFormat};

/// Flash capacity in bytes
pub const FLASH_SIZE: usize = 128 * 1024;

pub struct Flash {
    /// Always `FLASH_SIZE` bytes; zero past the installed image
    data: Vec<u8>,
    /// Installed image length, grown by writes past its end
    len: usize,
    write_enabled: bool,
    dirty: bool,
    source: String,
    pub loaded: bool,
    /// Runtime writes dropped because write-enable was off
    pub dbg_dropped_writes: u32,
}

impl Flash {
    pub fn new() -> Self {
        Flash {
            data: vec![0u8; FLASH_SIZE],
            len: 0,
            write_enabled: false,
            dirty: false,
            source: String::new(),
            loaded: false,
            dbg_dropped_writes: 0,
        }
    }

    /// Install an image.
    ///
    /// The bytes are validated and converted in full before anything is
    /// replaced, so on error the previous contents stay installed.
    pub fn load_image(
        &mut self,
        bytes: &[u8],
        format: ImageFormat,
        source: &str,
        write_enabled: bool,
    ) -> Result<(), LoadError> {
        let mut data = image::build_flash(bytes, format, source)?;
        let len = data.len();
        debug!(
            "flash: installed {} image '{}' ({} bytes, writes {})",
            format,
            source,
            len,
            if write_enabled { "enabled" } else { "disabled" }
        );
        data.resize(FLASH_SIZE, 0);
        self.data = data;
        self.len = len;
        self.write_enabled = write_enabled;
        self.dirty = false;
        self.source = source.to_string();
        self.loaded = true;
        self.dbg_dropped_writes = 0;
        Ok(())
    }

    /// Read a byte; addresses past the installed image read as 0.
    #[inline(always)]
    pub fn read(&self, addr: usize) -> u8 {
        self.data.get(addr).copied().unwrap_or(0)
    }

    /// Runtime write. Returns false when the write was dropped.
    pub fn write(&mut self, addr: usize, value: u8) -> bool {
        if !self.write_enabled {
            self.dbg_dropped_writes += 1;
            trace!("flash: write to {:05X} dropped (write-protected)", addr);
            return false;
        }
        match self.data.get_mut(addr) {
            Some(b) => {
                *b = value;
                self.len = self.len.max(addr + 1);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// The installed image, including any bytes written past its end.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// True once a runtime write has landed since the last load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// Identifier the current image was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for Flash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        let mut flash = Flash::new();
        let bytes: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        flash.load_image(&bytes, ImageFormat::RawBinary, "game.bin", false).unwrap();
        assert_eq!(flash.data(), &bytes[..]);
        assert_eq!(flash.read(999), bytes[999]);
        assert_eq!(flash.read(1000), 0);
        assert!(flash.loaded);
        assert_eq!(flash.source(), "game.bin");
    }

    #[test]
    fn test_empty_load_keeps_previous() {
        let mut flash = Flash::new();
        flash.load_image(&[1, 2, 3], ImageFormat::RawBinary, "a.bin", false).unwrap();
        assert_eq!(
            flash.load_image(&[], ImageFormat::RawBinary, "b.bin", true),
            Err(LoadError::Empty)
        );
        assert_eq!(flash.data(), &[1, 2, 3]);
        assert_eq!(flash.source(), "a.bin");
        assert!(!flash.write_enabled());
    }

    #[test]
    fn test_truncated_vms_keeps_previous() {
        let mut flash = Flash::new();
        flash.load_image(&[9; 16], ImageFormat::RawBinary, "a.bin", false).unwrap();
        let err = flash.load_image(&[0; 0x100], ImageFormat::Vms, "b.vms", false);
        assert!(matches!(err, Err(LoadError::Truncated { .. })));
        assert_eq!(flash.data(), &[9; 16]);
    }

    #[test]
    fn test_write_protected_drops_writes() {
        let mut flash = Flash::new();
        flash.load_image(&[0xFF; 256], ImageFormat::RawBinary, "a.bin", false).unwrap();
        assert!(!flash.write(0x10, 0x00));
        assert_eq!(flash.read(0x10), 0xFF);
        assert_eq!(flash.dbg_dropped_writes, 1);
    }

    #[test]
    fn test_write_enabled_stores() {
        let mut flash = Flash::new();
        flash.load_image(&[0xFF; 256], ImageFormat::RawBinary, "a.bin", true).unwrap();
        assert!(!flash.is_dirty());
        assert!(flash.write(0x10, 0x5A));
        assert_eq!(flash.read(0x10), 0x5A);
        assert!(flash.is_dirty());
        assert_eq!(flash.data().len(), 256);
        // Past the end of the 128 KB part
        assert!(!flash.write(FLASH_SIZE, 0x5A));
    }

    #[test]
    fn test_write_past_short_image() {
        let mut flash = Flash::new();
        flash.load_image(&[0x11; 0x8000], ImageFormat::RawBinary, "a.bin", true).unwrap();
        assert_eq!(flash.read(0x10000), 0);
        assert!(flash.write(0x10000, 0x5A));
        assert_eq!(flash.read(0x10000), 0x5A);
        assert_eq!(flash.data().len(), 0x10001);
        assert_eq!(flash.data()[0x7FFF], 0x11);
        assert_eq!(flash.data()[0x8000], 0x00);
        assert!(flash.write(FLASH_SIZE - 1, 0x01));
        assert_eq!(flash.data().len(), FLASH_SIZE);
    }

    #[test]
    fn test_reload_clears_tail() {
        let mut flash = Flash::new();
        flash.load_image(&[0x11; 0x100], ImageFormat::RawBinary, "a.bin", true).unwrap();
        assert!(flash.write(0x1000, 0x77));
        flash.load_image(&[0x22; 0x100], ImageFormat::RawBinary, "b.bin", true).unwrap();
        assert_eq!(flash.read(0x1000), 0);
        assert_eq!(flash.data(), &[0x22; 0x100][..]);
        assert!(!flash.is_dirty());
    }
}
