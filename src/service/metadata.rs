use std::io::Cursor;

use image::ImageReader;
use log::debug;

use super::MetadataExtractor;
use crate::db::Metadata;
use crate::error::{CatalogError, Result};

/// 提取图片格式、尺寸以及主 IFD 中的 EXIF 字段
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifExtractor;

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, image: &[u8]) -> Result<Metadata> {
        let unreadable = |e: image::ImageError| CatalogError::UnreadableImage(e.to_string());

        let reader = ImageReader::new(Cursor::new(image)).with_guessed_format()?;
        let Some(format) = reader.format() else {
            return Err(CatalogError::UnreadableImage("无法识别的图片格式".to_owned()));
        };
        let (width, height) = reader.into_dimensions().map_err(unreadable)?;

        let mut metadata = Metadata::new();
        metadata.insert("Format".to_owned(), format.to_mime_type().to_owned());
        metadata.insert("Width".to_owned(), width.to_string());
        metadata.insert("Height".to_owned(), height.to_string());

        match exif::Reader::new().read_from_container(&mut Cursor::new(image)) {
            Ok(exif) => {
                for field in exif.fields().filter(|f| f.ifd_num == exif::In::PRIMARY) {
                    let value = field.display_value().with_unit(&exif).to_string();
                    metadata.insert(field.tag.to_string(), value);
                }
            }
            Err(exif::Error::NotFound(_)) => {}
            Err(e) => debug!("读取 EXIF 失败: {e}"),
        }

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;

    #[test]
    fn test_extract_png() {
        let mut data = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(32, 16))
            .write_to(&mut data, ImageFormat::Png)
            .unwrap();

        let metadata = ExifExtractor.extract(data.get_ref()).unwrap();
        assert_eq!(metadata["Format"], "image/png");
        assert_eq!(metadata["Width"], "32");
        assert_eq!(metadata["Height"], "16");
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_extract_garbage() {
        let err = ExifExtractor.extract(b"hello world").unwrap_err();
        assert!(matches!(err, CatalogError::UnreadableImage(_)));
    }
}
