use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use tracing::error;

use crate::config::{OutputConfig, PanelFormat};
use crate::error::{Result, SegmentError};
use crate::models::{Panel, PanelPlacement};
use crate::pipeline::BoundingBox;

/// Copy exactly the pixels inside `bbox`.
/// A box that is empty or reaches outside the image is a bug upstream, not bad input.
pub fn crop_panel(image: &DynamicImage, bbox: &BoundingBox) -> Result<DynamicImage> {
    let (width, height) = image.dimensions();
    if !bbox.fits_within(width, height) {
        error!(?bbox, width, height, "panel box outside page");
        return Err(SegmentError::Crop {
            bbox: *bbox,
            width,
            height,
        });
    }
    Ok(image.crop_imm(bbox.x, bbox.y, bbox.width, bbox.height))
}

/// Encode a crop in the configured output format
pub fn encode_panel(image: &DynamicImage, output: &OutputConfig) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match output.format {
        PanelFormat::Png => image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| SegmentError::Processing(format!("PNG encoding failed: {}", e)))?,
        PanelFormat::Jpeg => {
            // JPEG has no alpha and no 16-bit mode
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, output.jpeg_quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| SegmentError::Processing(format!("JPEG encoding failed: {}", e)))?;
        }
    }
    Ok(buf)
}

/// Crop one placed panel out of the page and encode it
pub fn extract_panel(page: &DynamicImage, placement: &PanelPlacement, output: &OutputConfig) -> Result<Panel> {
    let crop = crop_panel(page, &placement.bbox)?;
    Ok(Panel {
        panel_number: placement.panel_number,
        bounding_box: placement.bbox,
        image_data: encode_panel(&crop, output)?,
    })
}
