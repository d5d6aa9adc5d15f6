//! VHD image inspection.
//!
//! Opens a local VHD, identifies its type from the footer and describes the image as the
//! extents of a fixed disk, which is the layout a page blob must hold.

mod footer;

pub use footer::{DiskType, DynamicHeader, VhdFooter};

use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use zerocopy::{FromZeros, IntoBytes};

/// An error encountered while opening a VHD.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VhdError {
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("file too small to hold a VHD footer: {0} bytes")]
    TooSmall(u64),
    #[error("VHD file footer is missing")]
    InvalidFooterCookie,
    #[error("invalid VHD footer checksum")]
    InvalidFooterChecksum,
    #[error("unsupported VHD version: {0:#x}")]
    UnsupportedVersion(u32),
    #[error("unknown VHD disk type: {0}")]
    UnknownDiskType(u32),
    #[error("{0} VHDs cannot be uploaded")]
    Unsupported(DiskType),
    #[error("invalid dynamic disk header")]
    InvalidDynamicHeader,
    #[error("invalid dynamic disk block size: {0}")]
    InvalidBlockSize(u32),
    #[error("block {index} lies outside the file")]
    BlockOutOfBounds { index: usize },
    #[error("invalid disk size: {0}")]
    InvalidDiskSize(u64),
}

/// A contiguous piece of the fixed-layout image.
#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    /// Offset of this piece in the fixed image (and the page blob).
    pub image_offset: u64,
    pub source: ExtentSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtentSource {
    /// Bytes read from the VHD file.
    File { offset: u64, len: u64 },
    /// Bytes synthesized in memory.
    Inline(Bytes),
}

impl Extent {
    pub fn len(&self) -> u64 {
        match &self.source {
            ExtentSource::File { len, .. } => *len,
            ExtentSource::Inline(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
enum Layout {
    Fixed,
    Dynamic {
        block_size: u64,
        bitmap_len: u64,
        table: Vec<u32>,
    },
}

/// An opened VHD file.
#[derive(Debug)]
pub struct VirtualDisk {
    path: PathBuf,
    file_len: u64,
    footer: VhdFooter,
    layout: Layout,
}

impl VirtualDisk {
    /// Opens a VHD and parses its footer (and block table for dynamic disks).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VhdError> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < VhdFooter::LEN {
            return Err(VhdError::TooSmall(file_len));
        }

        let mut footer = VhdFooter::new_zeroed();
        file.seek(SeekFrom::Start(file_len - VhdFooter::LEN))?;
        file.read_exact(footer.as_mut_bytes())?;

        if footer.cookie != VhdFooter::COOKIE_MAGIC {
            return Err(VhdError::InvalidFooterCookie);
        }
        if footer.checksum.get() != footer.compute_checksum() {
            return Err(VhdError::InvalidFooterChecksum);
        }
        if footer.file_format_version.get() != VhdFooter::FILE_FORMAT_VERSION_MAGIC {
            return Err(VhdError::UnsupportedVersion(
                footer.file_format_version.get(),
            ));
        }

        let disk_type = footer
            .disk_type()
            .ok_or(VhdError::UnknownDiskType(footer.disk_type.get()))?;

        let layout = match disk_type {
            DiskType::Fixed => Layout::Fixed,
            DiskType::Dynamic => read_dynamic_layout(&mut file, &footer, file_len)?,
            DiskType::Differencing => return Err(VhdError::Unsupported(disk_type)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            file_len,
            footer,
            layout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disk_type(&self) -> DiskType {
        match self.layout {
            Layout::Fixed => DiskType::Fixed,
            Layout::Dynamic { .. } => DiskType::Dynamic,
        }
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Size of the disk as seen by a guest, excluding the footer.
    pub fn virtual_size(&self) -> u64 {
        self.footer.current_size.get()
    }

    /// Size of the page blob holding this disk in fixed layout.
    pub fn blob_size(&self) -> u64 {
        match self.layout {
            Layout::Fixed => self.file_len,
            Layout::Dynamic { .. } => self.virtual_size() + VhdFooter::LEN,
        }
    }

    /// True when a fixed disk's length is a whole number of sectors.
    pub fn is_sector_aligned(&self) -> bool {
        self.file_len % VhdFooter::SECTOR_SIZE == 0
    }

    /// Describes the fixed-layout image as extents in ascending image order.
    ///
    /// Regions not covered by an extent are zero.
    pub fn extents(&self) -> Vec<Extent> {
        match &self.layout {
            Layout::Fixed => vec![Extent {
                image_offset: 0,
                source: ExtentSource::File {
                    offset: 0,
                    len: self.file_len,
                },
            }],
            Layout::Dynamic {
                block_size,
                bitmap_len,
                table,
            } => {
                let virtual_size = self.virtual_size();
                let mut extents: Vec<Extent> = table
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| **entry != DynamicHeader::UNUSED_ENTRY)
                    .filter_map(|(index, entry)| {
                        let image_offset = index as u64 * block_size;
                        if image_offset >= virtual_size {
                            return None;
                        }
                        let len = (*block_size).min(virtual_size - image_offset);
                        Some(Extent {
                            image_offset,
                            source: ExtentSource::File {
                                offset: *entry as u64 * VhdFooter::SECTOR_SIZE + bitmap_len,
                                len,
                            },
                        })
                    })
                    .collect();

                extents.push(Extent {
                    image_offset: virtual_size,
                    source: ExtentSource::Inline(Bytes::copy_from_slice(
                        self.footer.to_fixed().as_bytes(),
                    )),
                });
                extents
            }
        }
    }
}

fn read_dynamic_layout(
    file: &mut File,
    footer: &VhdFooter,
    file_len: u64,
) -> Result<Layout, VhdError> {
    let header_offset = footer.data_offset.get();
    match header_offset.checked_add(DynamicHeader::LEN) {
        Some(end) if end <= file_len => {}
        _ => return Err(VhdError::InvalidDynamicHeader),
    }

    let mut header = DynamicHeader::new_zeroed();
    file.seek(SeekFrom::Start(header_offset))?;
    file.read_exact(header.as_mut_bytes())?;

    if header.cookie != DynamicHeader::COOKIE_MAGIC
        || header.checksum.get() != header.compute_checksum()
    {
        return Err(VhdError::InvalidDynamicHeader);
    }

    let block_size = header.block_size.get();
    if block_size == 0 || block_size as u64 % VhdFooter::SECTOR_SIZE != 0 {
        return Err(VhdError::InvalidBlockSize(block_size));
    }

    let virtual_size = footer.current_size.get();
    if virtual_size % VhdFooter::SECTOR_SIZE != 0 {
        return Err(VhdError::InvalidDiskSize(virtual_size));
    }

    // The table must lie inside the file and cover every block of the disk
    let entries = header.max_table_entries.get() as u64;
    let required = virtual_size.div_ceil(block_size as u64);
    match header.table_offset.get().checked_add(entries * 4) {
        Some(end) if end <= file_len && entries >= required => {}
        _ => return Err(VhdError::InvalidDynamicHeader),
    }

    let mut raw = vec![0u8; entries as usize * 4];
    file.seek(SeekFrom::Start(header.table_offset.get()))?;
    file.read_exact(&mut raw)?;
    let table: Vec<u32> = raw
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let bitmap_len = header.bitmap_len();
    let data_end = file_len - VhdFooter::LEN;
    for (index, entry) in table.iter().enumerate() {
        if *entry == DynamicHeader::UNUSED_ENTRY {
            continue;
        }
        let start = *entry as u64 * VhdFooter::SECTOR_SIZE + bitmap_len;
        let block_len = (block_size as u64)
            .min(virtual_size.saturating_sub(index as u64 * block_size as u64));
        if start + block_len > data_end {
            return Err(VhdError::BlockOutOfBounds { index });
        }
    }

    Ok(Layout::Dynamic {
        block_size: block_size as u64,
        bitmap_len,
        table,
    })
}
