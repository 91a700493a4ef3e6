//! Manga reading order: rows top to bottom, right to left inside a row.
//!
//! Panels stacked in the same column of a row (for example two short panels
//! beside one tall panel) are read top to bottom before moving left.

use std::cmp::Reverse;

use crate::config::ReadingOrderConfig;
use crate::models::PanelPlacement;
use crate::pipeline::BoundingBox;

/// Boxes sharing a horizontal band of the page
struct Row {
    top: u64,
    bottom: u64,
    members: Vec<BoundingBox>,
}

impl Row {
    fn open(bbox: BoundingBox) -> Self {
        Self {
            top: bbox.y as u64,
            bottom: bbox.bottom(),
            members: vec![bbox],
        }
    }

    fn height(&self) -> u64 {
        self.bottom - self.top
    }

    fn accepts(&self, bbox: &BoundingBox, overlap_ratio: f32, top_slack: f64) -> bool {
        let overlap = bbox.vertical_overlap(self.top, self.bottom);
        let smaller = self.height().min(bbox.height as u64);
        if overlap as f64 > overlap_ratio as f64 * smaller as f64 {
            return true;
        }
        (bbox.y as f64 - self.top as f64).abs() < top_slack
    }

    fn push(&mut self, bbox: BoundingBox) {
        self.top = self.top.min(bbox.y as u64);
        self.bottom = self.bottom.max(bbox.bottom());
        self.members.push(bbox);
    }
}

/// Order `boxes` for reading and number them from 1.
///
/// The result depends only on the set of boxes, not on their input order.
pub fn resolve_reading_order(boxes: &[BoundingBox], config: &ReadingOrderConfig) -> Vec<PanelPlacement> {
    if boxes.is_empty() {
        return Vec::new();
    }

    let mut sorted = boxes.to_vec();
    sorted.sort_by_key(|b| (b.y, Reverse(b.x), b.height, b.width));

    let count = sorted.len() as f64;
    let avg_height = sorted.iter().map(|b| b.height as f64).sum::<f64>() / count;
    let avg_width = sorted.iter().map(|b| b.width as f64).sum::<f64>() / count;
    let top_slack = config.row_top_tolerance as f64 * avg_height;
    let column_slack = config.column_tolerance as f64 * avg_width;

    let mut rows: Vec<Row> = Vec::new();
    for bbox in sorted {
        match rows
            .iter_mut()
            .find(|row| row.accepts(&bbox, config.row_overlap_ratio, top_slack))
        {
            Some(row) => row.push(bbox),
            None => rows.push(Row::open(bbox)),
        }
    }
    rows.sort_by_key(|row| (row.top, row.bottom));

    rows.into_iter()
        .flat_map(|row| order_row(row.members, column_slack))
        .enumerate()
        .map(|(idx, bbox)| PanelPlacement {
            panel_number: idx as u32 + 1,
            bbox,
        })
        .collect()
}

/// Right to left, with each column of stacked boxes read top to bottom
fn order_row(mut members: Vec<BoundingBox>, column_slack: f64) -> Vec<BoundingBox> {
    members.sort_by_key(|b| (Reverse(b.x), b.y, b.height, b.width));

    let mut columns: Vec<Vec<BoundingBox>> = Vec::new();
    for bbox in members {
        match columns.last_mut() {
            // Anchor is the first (rightmost) box of the column
            Some(column) if (column[0].x - bbox.x) as f64 <= column_slack => column.push(bbox),
            _ => columns.push(vec![bbox]),
        }
    }

    columns
        .into_iter()
        .flat_map(|mut column| {
            column.sort_by_key(|b| (b.y, Reverse(b.x), b.height, b.width));
            column
        })
        .collect()
}
