/// Volume (partition table) systems readable from raw images
pub mod mbr;

pub use mbr::DosVolume;
