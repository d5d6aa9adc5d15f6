//! On-disk VHD structures: the 512-byte footer and the dynamic disk header.

use self::packed_nums::*;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[allow(non_camel_case_types)]
mod packed_nums {
    pub type u32_be = zerocopy::U32<zerocopy::BigEndian>;
    pub type u64_be = zerocopy::U64<zerocopy::BigEndian>;
}

/// Disk type recorded in the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Fixed,
    Dynamic,
    Differencing,
}

impl DiskType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            VhdFooter::DISK_TYPE_FIXED => Some(Self::Fixed),
            VhdFooter::DISK_TYPE_DYNAMIC => Some(Self::Dynamic),
            VhdFooter::DISK_TYPE_DIFFERENCING => Some(Self::Differencing),
            _ => None,
        }
    }
}

impl std::fmt::Display for DiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskType::Fixed => write!(f, "fixed"),
            DiskType::Dynamic => write!(f, "dynamic"),
            DiskType::Differencing => write!(f, "differencing"),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VhdFooter {
    pub cookie: u64_be,
    pub features: u32_be,
    pub file_format_version: u32_be,
    pub data_offset: u64_be,
    pub time_stamp: u32_be,
    pub creator_application: u32_be,
    pub creator_version: u32_be,
    pub creator_host_os: u32_be,
    pub original_size: u64_be,
    pub current_size: u64_be,
    pub disk_geometry: u32_be,
    pub disk_type: u32_be,
    pub checksum: u32_be,
    pub unique_id: [u8; 16],
    pub saved_state: u8,
    pub reserved: [u8; 427],
}

impl VhdFooter {
    pub const LEN: u64 = 512;
    pub const SECTOR_SIZE: u64 = 512;

    pub const COOKIE_MAGIC: u64_be = u64_be::from_bytes(*b"conectix");
    pub const FEATURE_MASK: u32 = 0x2;
    pub const FILE_FORMAT_VERSION_MAGIC: u32 = 0x00010000;
    pub const FIXED_DATA_OFFSET: u64 = !0;
    pub const CREATOR_VERSION_MAGIC: u32 = 0x000a0000;
    pub const DISK_TYPE_FIXED: u32 = 2;
    pub const DISK_TYPE_DYNAMIC: u32 = 3;
    pub const DISK_TYPE_DIFFERENCING: u32 = 4;

    /// Footer for a fixed disk holding `size` bytes of data.
    pub fn new_fixed(size: u64, unique_id: [u8; 16]) -> Self {
        let mut footer = Self {
            cookie: Self::COOKIE_MAGIC,
            features: Self::FEATURE_MASK.into(),
            file_format_version: Self::FILE_FORMAT_VERSION_MAGIC.into(),
            data_offset: Self::FIXED_DATA_OFFSET.into(),
            creator_version: Self::CREATOR_VERSION_MAGIC.into(),
            original_size: size.into(),
            current_size: size.into(),
            disk_type: Self::DISK_TYPE_FIXED.into(),
            ..FromZeros::new_zeroed()
        };

        footer.unique_id = unique_id;
        footer.checksum = footer.compute_checksum().into();
        footer
    }

    /// Copy of this footer describing the same disk laid out as a fixed image.
    pub fn to_fixed(&self) -> Self {
        let mut footer = *self;
        footer.data_offset = Self::FIXED_DATA_OFFSET.into();
        footer.disk_type = Self::DISK_TYPE_FIXED.into();
        footer.checksum = footer.compute_checksum().into();
        footer
    }

    pub fn disk_type(&self) -> Option<DiskType> {
        DiskType::from_raw(self.disk_type.get())
    }

    pub fn compute_checksum(&self) -> u32 {
        !(self.as_bytes().iter().map(|b| *b as u32).sum::<u32>()
            - self
                .checksum
                .as_bytes()
                .iter()
                .map(|b| *b as u32)
                .sum::<u32>())
    }
}

/// Header that follows the footer copy at the start of dynamic and differencing disks.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct DynamicHeader {
    pub cookie: u64_be,
    pub data_offset: u64_be,
    pub table_offset: u64_be,
    pub header_version: u32_be,
    pub max_table_entries: u32_be,
    pub block_size: u32_be,
    pub checksum: u32_be,
    pub parent_unique_id: [u8; 16],
    pub parent_time_stamp: u32_be,
    pub reserved1: u32_be,
    pub parent_unicode_name: [u8; 512],
    pub parent_locator_entries: [u8; 192],
    pub reserved2: [u8; 256],
}

impl DynamicHeader {
    pub const LEN: u64 = 1024;

    pub const COOKIE_MAGIC: u64_be = u64_be::from_bytes(*b"cxsparse");
    pub const HEADER_VERSION_MAGIC: u32 = 0x00010000;
    pub const UNUSED_ENTRY: u32 = 0xFFFF_FFFF;

    pub fn new(table_offset: u64, max_table_entries: u32, block_size: u32) -> Self {
        let mut header = Self {
            cookie: Self::COOKIE_MAGIC,
            data_offset: VhdFooter::FIXED_DATA_OFFSET.into(),
            table_offset: table_offset.into(),
            header_version: Self::HEADER_VERSION_MAGIC.into(),
            max_table_entries: max_table_entries.into(),
            block_size: block_size.into(),
            ..FromZeros::new_zeroed()
        };
        header.checksum = header.compute_checksum().into();
        header
    }

    /// Bytes of sector bitmap preceding each block's data, rounded to whole sectors.
    pub fn bitmap_len(&self) -> u64 {
        let sectors_per_block = self.block_size.get() as u64 / VhdFooter::SECTOR_SIZE;
        let bitmap_bytes = sectors_per_block.div_ceil(8);
        bitmap_bytes.div_ceil(VhdFooter::SECTOR_SIZE) * VhdFooter::SECTOR_SIZE
    }

    pub fn compute_checksum(&self) -> u32 {
        !(self.as_bytes().iter().map(|b| *b as u32).sum::<u32>()
            - self
                .checksum
                .as_bytes()
                .iter()
                .map(|b| *b as u32)
                .sum::<u32>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<VhdFooter>() as u64, VhdFooter::LEN);
        assert_eq!(std::mem::size_of::<DynamicHeader>() as u64, DynamicHeader::LEN);
    }

    #[test]
    fn test_new_fixed_checksum_validates() {
        let footer = VhdFooter::new_fixed(1024 * 1024, [7; 16]);
        assert_eq!(footer.checksum.get(), footer.compute_checksum());
        assert_eq!(footer.disk_type(), Some(DiskType::Fixed));
        assert_eq!(footer.current_size.get(), 1024 * 1024);
    }

    #[test]
    fn test_to_fixed_rewrites_type_and_checksum() {
        let mut dynamic = VhdFooter::new_fixed(4096, [1; 16]);
        dynamic.disk_type = VhdFooter::DISK_TYPE_DYNAMIC.into();
        dynamic.data_offset = 512u64.into();
        dynamic.checksum = dynamic.compute_checksum().into();

        let fixed = dynamic.to_fixed();
        assert_eq!(fixed.disk_type(), Some(DiskType::Fixed));
        assert_eq!(fixed.data_offset.get(), VhdFooter::FIXED_DATA_OFFSET);
        assert_eq!(fixed.checksum.get(), fixed.compute_checksum());
        assert_eq!(fixed.unique_id, dynamic.unique_id);
    }

    #[test]
    fn test_bitmap_len_rounds_to_sector() {
        // 2 MiB blocks: 4096 sectors -> 512 bitmap bytes
        assert_eq!(DynamicHeader::new(0, 1, 2 * 1024 * 1024).bitmap_len(), 512);
        // 4 KiB blocks: 8 sectors -> 1 byte, padded to one sector
        assert_eq!(DynamicHeader::new(0, 1, 4096).bitmap_len(), 512);
    }

    #[test]
    fn test_unknown_disk_type() {
        assert_eq!(DiskType::from_raw(9), None);
        assert_eq!(DiskType::from_raw(3), Some(DiskType::Dynamic));
    }
}
