//! EXIF orientation handling.

use exif::{In, Reader, Tag, Value};
use image::DynamicImage;
use std::io::Cursor;

/// The eight EXIF orientations, named by the transform that undoes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    /// Rotate 90° clockwise, then mirror horizontally (EXIF 5)
    Rotate90FlipH,
    Rotate90,
    /// Rotate 270° clockwise, then mirror horizontally (EXIF 7)
    Rotate270FlipH,
    Rotate270,
}

impl Orientation {
    /// Map an EXIF `Orientation` tag value (1-8).
    pub fn from_exif_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::FlipHorizontal),
            3 => Some(Self::Rotate180),
            4 => Some(Self::FlipVertical),
            5 => Some(Self::Rotate90FlipH),
            6 => Some(Self::Rotate90),
            7 => Some(Self::Rotate270FlipH),
            8 => Some(Self::Rotate270),
            _ => None,
        }
    }

    pub fn exif_value(self) -> u32 {
        match self {
            Self::Normal => 1,
            Self::FlipHorizontal => 2,
            Self::Rotate180 => 3,
            Self::FlipVertical => 4,
            Self::Rotate90FlipH => 5,
            Self::Rotate90 => 6,
            Self::Rotate270FlipH => 7,
            Self::Rotate270 => 8,
        }
    }

    /// Read the orientation from an encoded image.
    ///
    /// Lenient: missing or unreadable EXIF, or an out-of-range value, is `Normal`.
    pub fn read(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        let Ok(exif) = Reader::new().read_from_container(&mut cursor) else {
            return Self::Normal;
        };

        exif.get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|f| match &f.value {
                Value::Short(v) => v.first().map(|&x| x as u32),
                Value::Long(v) => v.first().copied(),
                _ => None,
            })
            .and_then(Self::from_exif_value)
            .unwrap_or_default()
    }

    /// Rewrite pixel order so the image displays upright with no orientation tag.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => image,
            Self::FlipHorizontal => image.fliph(),
            Self::Rotate180 => image.rotate180(),
            Self::FlipVertical => image.flipv(),
            Self::Rotate90FlipH => image.rotate90().fliph(),
            Self::Rotate90 => image.rotate90(),
            Self::Rotate270FlipH => image.rotate270().fliph(),
            Self::Rotate270 => image.rotate270(),
        }
    }
}
