//! Image file formats and the VMU flash filesystem layout.
//!
//! Three container formats are accepted:
//! - raw binary: a flash dump or bare game binary, installed byte for byte
//! - VMS: a game file as downloaded to the VMU (header at 0x200, icons after)
//! - DCI: a Nexus memory-card dump of one file: a 32-byte directory entry
//!   followed by the file blocks, each 32-bit word byte-swapped
//!
//! VMS and DCI files are placed into a freshly formatted 128 KB filesystem
//! so the firmware sees a valid root block, FAT and directory.

use std::fmt;
use std::path::Path;

use crate::error::LoadError;
use crate::flash::FLASH_SIZE;

pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_COUNT: usize = FLASH_SIZE / BLOCK_SIZE;

const ROOT_BLOCK: u16 = 255;
const FAT_BLOCK: u16 = 254;
const DIR_BLOCK: u16 = 253;
const DIR_BLOCKS: u16 = 13;
/// Blocks available to files (0..USER_BLOCKS)
const USER_BLOCKS: u16 = 200;

const FAT_FREE: u16 = 0xFFFC;
const FAT_END: u16 = 0xFFFA;

const DIR_ENTRY_SIZE: usize = 32;
const FILE_TYPE_GAME: u8 = 0xCC;
const FILE_TYPE_DATA: u8 = 0x33;

/// Offset of the VMS header inside a game file
const VMS_HEADER_OFFSET: usize = 0x200;
/// VMS header length (description, icon info, palette)
const VMS_HEADER_SIZE: usize = 0x80;
const VMS_ICON_SIZE: usize = 0x200;

/// Timestamp written to generated directory entries (BCD: 1999-09-09 00:00:00, Thursday)
const FS_TIMESTAMP: [u8; 8] = [0x19, 0x99, 0x09, 0x09, 0x00, 0x00, 0x00, 0x03];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    RawBinary,
    Vms,
    Dci,
}

impl ImageFormat {
    /// Guess the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "bin" => Ok(ImageFormat::RawBinary),
            "vms" => Ok(ImageFormat::Vms),
            "dci" => Ok(ImageFormat::Dci),
            _ => Err(LoadError::UnknownFormat(path.display().to_string())),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageFormat::RawBinary => "raw binary",
            ImageFormat::Vms => "VMS",
            ImageFormat::Dci => "DCI",
        })
    }
}

/// Validate and convert an image into the bytes to install in flash.
pub fn build_flash(bytes: &[u8], format: ImageFormat, source: &str) -> Result<Vec<u8>, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    match format {
        ImageFormat::RawBinary => {
            if bytes.len() > FLASH_SIZE {
                return Err(LoadError::TooLarge {
                    format,
                    size: bytes.len(),
                    limit: FLASH_SIZE,
                });
            }
            Ok(bytes.to_vec())
        }
        ImageFormat::Vms => build_from_vms(bytes, source),
        ImageFormat::Dci => build_from_dci(bytes),
    }
}

fn build_from_vms(bytes: &[u8], source: &str) -> Result<Vec<u8>, LoadError> {
    let format = ImageFormat::Vms;
    let header_end = VMS_HEADER_OFFSET + VMS_HEADER_SIZE;
    if bytes.len() < header_end {
        return Err(LoadError::Truncated {
            format,
            needed: header_end,
            actual: bytes.len(),
        });
    }
    let header = &bytes[VMS_HEADER_OFFSET..header_end];
    let icons = read_u16(header, 0x40) as usize;
    let eyecatch = match read_u16(header, 0x44) {
        0 => 0,
        1 => 72 * 56 * 2,
        2 => 0x200 + 72 * 56,
        3 => 0x20 + 72 * 56 / 2,
        _ => {
            return Err(LoadError::BadHeader {
                format,
                reason: "unknown eyecatch type",
            })
        }
    };
    let needed = header_end + icons * VMS_ICON_SIZE + eyecatch;
    if bytes.len() < needed {
        return Err(LoadError::Truncated {
            format,
            needed,
            actual: bytes.len(),
        });
    }

    let blocks = bytes.len().div_ceil(BLOCK_SIZE);
    if blocks > USER_BLOCKS as usize {
        return Err(LoadError::TooLarge {
            format,
            size: bytes.len(),
            limit: USER_BLOCKS as usize * BLOCK_SIZE,
        });
    }

    let mut entry = [0u8; DIR_ENTRY_SIZE];
    entry[0x00] = FILE_TYPE_GAME;
    entry[0x04..0x10].copy_from_slice(&file_name(source));
    entry[0x10..0x18].copy_from_slice(&FS_TIMESTAMP);
    entry[0x18..0x1A].copy_from_slice(&(blocks as u16).to_le_bytes());
    // Header sits in block 1 of a game file
    entry[0x1A..0x1C].copy_from_slice(&1u16.to_le_bytes());

    let mut fs = Filesystem::format();
    fs.install(&entry, bytes, blocks as u16);
    Ok(fs.data)
}

fn build_from_dci(bytes: &[u8]) -> Result<Vec<u8>, LoadError> {
    let format = ImageFormat::Dci;
    if bytes.len() < DIR_ENTRY_SIZE {
        return Err(LoadError::Truncated {
            format,
            needed: DIR_ENTRY_SIZE,
            actual: bytes.len(),
        });
    }
    let mut entry = [0u8; DIR_ENTRY_SIZE];
    entry.copy_from_slice(&bytes[..DIR_ENTRY_SIZE]);
    if entry[0] != FILE_TYPE_GAME && entry[0] != FILE_TYPE_DATA {
        return Err(LoadError::BadHeader {
            format,
            reason: "file type is neither game nor data",
        });
    }
    let blocks = read_u16(&entry, 0x18);
    if blocks == 0 {
        return Err(LoadError::BadHeader {
            format,
            reason: "zero-length file",
        });
    }
    if blocks > USER_BLOCKS {
        return Err(LoadError::TooLarge {
            format,
            size: blocks as usize * BLOCK_SIZE,
            limit: USER_BLOCKS as usize * BLOCK_SIZE,
        });
    }
    let payload = &bytes[DIR_ENTRY_SIZE..];
    let needed = blocks as usize * BLOCK_SIZE;
    if payload.len() < needed {
        return Err(LoadError::Truncated {
            format,
            needed: DIR_ENTRY_SIZE + needed,
            actual: bytes.len(),
        });
    }
    if payload.len() > needed {
        return Err(LoadError::BadHeader {
            format,
            reason: "data length does not match block count",
        });
    }

    let mut data = payload.to_vec();
    for word in data.chunks_exact_mut(4) {
        word.reverse();
    }

    let mut fs = Filesystem::format();
    fs.install(&entry, &data, blocks);
    Ok(fs.data)
}

/// Directory file name: source stem, uppercased, space padded to 12 bytes.
fn file_name(source: &str) -> [u8; 12] {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut name = [b' '; 12];
    for (dst, c) in name.iter_mut().zip(stem.bytes()) {
        *dst = c.to_ascii_uppercase();
    }
    name
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

struct Filesystem {
    data: Vec<u8>,
}

impl Filesystem {
    /// Empty filesystem: root block, FAT and directory chain, no files.
    fn format() -> Self {
        let mut fs = Filesystem {
            data: vec![0u8; FLASH_SIZE],
        };

        let root = ROOT_BLOCK as usize * BLOCK_SIZE;
        fs.data[root..root + 16].fill(0x55);
        fs.data[root + 0x30..root + 0x38].copy_from_slice(&FS_TIMESTAMP);
        for (off, val) in [
            (0x46, FAT_BLOCK),
            (0x48, 1),
            (0x4A, DIR_BLOCK),
            (0x4C, DIR_BLOCKS),
            (0x50, USER_BLOCKS),
        ] {
            fs.data[root + off..root + off + 2].copy_from_slice(&val.to_le_bytes());
        }

        for block in 0..BLOCK_COUNT as u16 {
            fs.set_fat(block, FAT_FREE);
        }
        fs.set_fat(ROOT_BLOCK, FAT_END);
        fs.set_fat(FAT_BLOCK, FAT_END);
        // Directory chain runs downward from DIR_BLOCK
        let dir_last = DIR_BLOCK - (DIR_BLOCKS - 1);
        for block in (dir_last + 1..=DIR_BLOCK).rev() {
            fs.set_fat(block, block - 1);
        }
        fs.set_fat(dir_last, FAT_END);
        fs
    }

    fn set_fat(&mut self, block: u16, next: u16) {
        let off = FAT_BLOCK as usize * BLOCK_SIZE + block as usize * 2;
        self.data[off..off + 2].copy_from_slice(&next.to_le_bytes());
    }

    /// Place a file and write its directory entry to slot 0.
    ///
    /// Game files occupy blocks from 0 upward; data files from the top of
    /// the user area downward.
    fn install(&mut self, entry: &[u8; DIR_ENTRY_SIZE], contents: &[u8], blocks: u16) {
        let game = entry[0] == FILE_TYPE_GAME;
        let chain: Vec<u16> = if game {
            (0..blocks).collect()
        } else {
            (0..blocks).map(|i| USER_BLOCKS - 1 - i).collect()
        };

        for (i, &block) in chain.iter().enumerate() {
            let src_start = i * BLOCK_SIZE;
            let src_end = (src_start + BLOCK_SIZE).min(contents.len());
            let dst = block as usize * BLOCK_SIZE;
            if src_start < src_end {
                self.data[dst..dst + (src_end - src_start)]
                    .copy_from_slice(&contents[src_start..src_end]);
            }
            let next = chain.get(i + 1).copied().unwrap_or(FAT_END);
            self.set_fat(block, next);
        }

        let mut entry = *entry;
        entry[0x02..0x04].copy_from_slice(&chain[0].to_le_bytes());
        let dir = DIR_BLOCK as usize * BLOCK_SIZE;
        self.data[dir..dir + DIR_ENTRY_SIZE].copy_from_slice(&entry);
    }
}
