use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentError};
use crate::pipeline::BoundingBox;

/// One labelled region of the foreground mask, in mask coordinates
#[derive(Debug, Clone)]
pub struct Contour {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
}

impl Contour {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Area enclosed by the bounding box. A thin panel border has few pixels
    /// but encloses the whole panel, so gates use this rather than pixel_count.
    pub fn bbox_area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Share of the bounding box covered by the region's own pixels
    pub fn fill_ratio(&self) -> f32 {
        self.pixel_count as f32 / self.bbox_area() as f32
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }

    /// Whether the region reaches all four edges of a `width` x `height` mask
    pub fn touches_all_edges(&self, width: u32, height: u32) -> bool {
        self.min_x == 0 && self.min_y == 0 && self.max_x + 1 >= width && self.max_y + 1 >= height
    }

    /// Bounding box in page coordinates, given the mask's origin on the page
    pub fn to_bounding_box(&self, origin_x: u32, origin_y: u32) -> BoundingBox {
        BoundingBox::new(
            self.min_x + origin_x,
            self.min_y + origin_y,
            self.width(),
            self.height(),
        )
    }
}

/// Detector output: a candidate panel box and its score
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub pixel_count: u32,
    /// Fill ratio of the region inside its box, 0.0-1.0
    pub score: f32,
}

impl Candidate {
    pub fn from_contour(contour: &Contour, origin_x: u32, origin_y: u32) -> Self {
        Self {
            bbox: contour.to_bounding_box(origin_x, origin_y),
            pixel_count: contour.pixel_count,
            score: contour.fill_ratio(),
        }
    }
}

/// A panel box with its position in reading order (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelPlacement {
    pub panel_number: u32,
    pub bbox: BoundingBox,
}

/// A cropped panel, ready to hand to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub panel_number: u32,
    pub bounding_box: BoundingBox,
    /// Encoded crop (PNG or JPEG); base64 on the wire
    #[serde(with = "base64_bytes")]
    pub image_data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Complete answer for one page, serialized exactly as the web layer expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationResult {
    pub panels: Vec<Panel>,
    pub total_panels: usize,
    pub original_image: ImageDimensions,
    pub reading_order: Vec<u32>,
}

impl SegmentationResult {
    /// Assemble from panels already sorted in reading order, then check the invariants
    pub fn from_panels(original_image: ImageDimensions, panels: Vec<Panel>) -> Result<Self> {
        let reading_order = panels.iter().map(|p| p.panel_number).collect();
        let result = Self {
            total_panels: panels.len(),
            panels,
            original_image,
            reading_order,
        };
        result.validate()?;
        Ok(result)
    }

    /// Reading order is `1..=N` in sequence, numbers match positions,
    /// and every box lies inside the original image.
    pub fn validate(&self) -> Result<()> {
        if self.total_panels != self.panels.len() || self.reading_order.len() != self.panels.len() {
            return Err(SegmentError::Processing(format!(
                "panel count mismatch: total={}, panels={}, order={}",
                self.total_panels,
                self.panels.len(),
                self.reading_order.len()
            )));
        }

        for (idx, (panel, number)) in self.panels.iter().zip(&self.reading_order).enumerate() {
            let expected = idx as u32 + 1;
            if panel.panel_number != expected || *number != expected {
                return Err(SegmentError::Processing(format!(
                    "reading order broken at position {}: panel {} / order {}",
                    expected, panel.panel_number, number
                )));
            }
            let ImageDimensions { width, height } = self.original_image;
            if !panel.bounding_box.fits_within(width, height) {
                return Err(SegmentError::Processing(format!(
                    "panel {} box {:?} exceeds {}x{} page",
                    panel.panel_number, panel.bounding_box, width, height
                )));
            }
        }
        Ok(())
    }
}

/// Serde adapter: `Vec<u8>` <-> standard base64 string
mod base64_bytes {
    use base64::{Engine, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(number: u32, bbox: BoundingBox) -> Panel {
        Panel {
            panel_number: number,
            bounding_box: bbox,
            image_data: vec![1, 2, 3],
        }
    }

    const PAGE: ImageDimensions = ImageDimensions { width: 800, height: 600 };

    #[test]
    fn wire_format_field_names() {
        let result = SegmentationResult::from_panels(
            PAGE,
            vec![panel(1, BoundingBox::new(400, 0, 400, 300))],
        )
        .unwrap();

        let json: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalPanels"], 1);
        assert_eq!(json["originalImage"]["width"], 800);
        assert_eq!(json["readingOrder"], serde_json::json!([1]));
        let first = &json["panels"][0];
        assert_eq!(first["panelNumber"], 1);
        assert_eq!(first["boundingBox"]["x"], 400);
        assert_eq!(first["boundingBox"]["height"], 300);
        assert_eq!(first["imageData"], "AQID");
    }

    #[test]
    fn out_of_order_numbers_are_rejected() {
        let result = SegmentationResult::from_panels(
            PAGE,
            vec![
                panel(2, BoundingBox::new(0, 0, 10, 10)),
                panel(1, BoundingBox::new(20, 0, 10, 10)),
            ],
        );
        assert!(matches!(result, Err(SegmentError::Processing(_))));
    }

    #[test]
    fn box_outside_page_is_rejected() {
        let result = SegmentationResult::from_panels(
            PAGE,
            vec![panel(1, BoundingBox::new(790, 0, 20, 10))],
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_result_is_valid() {
        let result = SegmentationResult::from_panels(PAGE, Vec::new()).unwrap();
        assert_eq!(result.total_panels, 0);
        assert!(result.reading_order.is_empty());
    }

    #[test]
    fn contour_geometry() {
        let contour = Contour {
            label: 3,
            min_x: 10,
            min_y: 20,
            max_x: 109,
            max_y: 69,
            pixel_count: 1000,
        };
        assert_eq!(contour.width(), 100);
        assert_eq!(contour.height(), 50);
        assert_eq!(contour.bbox_area(), 5000);
        assert!((contour.fill_ratio() - 0.2).abs() < 1e-6);
        assert_eq!(contour.to_bounding_box(5, 5), BoundingBox::new(15, 25, 100, 50));
    }
}
